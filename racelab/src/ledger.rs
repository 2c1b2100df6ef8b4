//! The shared ledger: one integer, two ways to bump it.
//!
//! Both increments are a read, a pause of `race_window`, then a write of `read + 1`.
//! [`Ledger::increment_unsafe`] does it bare, so two callers that read before either
//! writes lose an update. [`Ledger::increment_safe`] does it under the ledger's mutex.
//!
//! The counter is an atomic accessed with separate relaxed `load`/`store` calls. That
//! keeps every access defined while leaving the read-modify-write itself unprotected,
//! which is the race being demonstrated.
use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::error::LedgerError;

pub const DEFAULT_RACE_WINDOW: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, TypedBuilder)]
pub struct LedgerConfig {
    /// Pause between the read and the write of every increment.
    #[builder(default = DEFAULT_RACE_WINDOW)]
    pub race_window: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
pub struct Ledger {
    value: AtomicU64,
    lock: Mutex<()>,
    race_window: Duration,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            value: AtomicU64::new(0),
            lock: Mutex::new(()),
            race_window: config.race_window,
        }
    }

    pub fn race_window(&self) -> Duration {
        self.race_window
    }

    /// Current value. May be stale as soon as it returns.
    pub fn read(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Unsynchronized read-pause-write. Returns the value written.
    ///
    /// Concurrent callers can overwrite each other and lose increments.
    pub fn increment_unsafe(&self) -> u64 {
        let current = self.value.load(Ordering::Relaxed);
        thread::sleep(self.race_window);
        let next = current + 1;
        self.value.store(next, Ordering::Relaxed);
        next
    }

    /// Read-pause-write under the ledger lock. Returns the value written.
    ///
    /// The guard releases the lock on every exit, unwinding included.
    pub fn increment_safe(&self) -> Result<u64, LedgerError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| LedgerError::Poisoned { op: "increment" })?;
        let current = self.value.load(Ordering::Relaxed);
        thread::sleep(self.race_window);
        let next = current + 1;
        self.value.store(next, Ordering::Relaxed);
        Ok(next)
    }

    /// Zero the ledger under the same lock as [`Ledger::increment_safe`].
    ///
    /// An unsynchronized increment already past its read can still write over the reset.
    pub fn reset(&self) -> Result<(), LedgerError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| LedgerError::Poisoned { op: "reset" })?;
        self.value.store(0, Ordering::Relaxed);
        tracing::info!("Ledger reset to 0");
        Ok(())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}
