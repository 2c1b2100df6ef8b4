use thiserror::Error;

use crate::dispatcher::RequestId;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A previous holder panicked while holding the ledger lock.
    #[error("ledger lock poisoned during {op}")]
    Poisoned { op: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid workload: {0}")]
    InvalidWorkload(String),
    /// Not produced by the unbounded pool.
    #[error("no worker available to accept the request")]
    WorkerUnavailable,
    #[error("ledger lock acquisition failed: {0}")]
    LockAcquisition(#[from] LedgerError),
    #[error("worker pool is closed")]
    PoolClosed,
    #[error("failed to spawn worker {slot}: {reason}")]
    Spawn { slot: usize, reason: String },
    #[error("worker dropped {0} before completing it")]
    WorkerLost(RequestId),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("think time lower bound {min:?} exceeds upper bound {max:?}")]
    InvalidThinkTime {
        min: std::time::Duration,
        max: std::time::Duration,
    },
    #[error("governor task failed: {0}")]
    Governor(#[from] tokio::task::JoinError),
}
