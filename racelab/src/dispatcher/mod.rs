//! Dispatchers: where a request runs and how it touches the ledger.
//!
//! - [`SerialDispatcher`] runs each request to completion on the caller's thread and
//!   increments the ledger without a lock, since nothing else can be in flight.
//! - [`PooledDispatcher`] hands requests to a fixed set of worker threads and returns
//!   each result through its own one-shot channel. `use_lock` picks the increment
//!   discipline per request.
//!
//! Both go through [`execute`], so the only difference between them is the execution
//! context and the discipline.
pub mod pool;
pub mod serial;

pub use pool::{Pending, PoolConfig, PooledDispatcher};
pub use serial::{SerialDispatcher, SerialState};

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DispatchError, Result},
    ledger::Ledger,
    metric::{Outcome, RequestMetric, Variant},
    recorder::Recorder,
    workload::WorkloadKind,
};

pub const DEFAULT_DURATION: Duration = Duration::from_millis(50);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Execution context a request ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    /// The single serial process.
    Process(u32),
    /// A pool worker slot.
    Slot(usize),
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Process(pid) => write!(f, "worker_A_{pid}"),
            WorkerId::Slot(n) => write!(f, "worker_B_{n}"),
        }
    }
}

/// How a request's ledger increment is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Unsynchronized,
    Locked,
}

impl Discipline {
    fn apply(self, ledger: &Ledger) -> Result<u64> {
        match self {
            Discipline::Unsynchronized => Ok(ledger.increment_unsafe()),
            Discipline::Locked => Ok(ledger.increment_safe()?),
        }
    }
}

/// One request as handed over by the intake layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub workload: WorkloadKind,
    pub duration: Duration,
    /// Pooled dispatcher only; the serial dispatcher never locks.
    pub use_lock: bool,
}

impl ProcessRequest {
    pub fn new(workload: WorkloadKind, duration: Duration) -> Self {
        Self {
            workload,
            duration,
            use_lock: false,
        }
    }

    pub fn locked(mut self, use_lock: bool) -> Self {
        self.use_lock = use_lock;
        self
    }

    /// Validate the raw `{workload_kind, duration_ms, use_lock}` tuple from the intake.
    pub fn parse(workload: &str, duration_ms: u64, use_lock: bool) -> Result<Self> {
        let workload = workload.parse::<WorkloadKind>()?;
        if duration_ms == 0 {
            return Err(DispatchError::InvalidWorkload(
                "duration_ms must be a positive integer".to_string(),
            ));
        }
        Ok(Self::new(workload, Duration::from_millis(duration_ms)).locked(use_lock))
    }

    pub(crate) fn discipline(&self) -> Discipline {
        if self.use_lock {
            Discipline::Locked
        } else {
            Discipline::Unsynchronized
        }
    }
}

impl Default for ProcessRequest {
    fn default() -> Self {
        Self::new(WorkloadKind::default(), DEFAULT_DURATION)
    }
}

/// Outcome of one completed request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub request_id: RequestId,
    #[serde(rename = "processing_time_ms", with = "millis")]
    pub processing_time: Duration,
    /// Ledger value written by this request's increment.
    #[serde(rename = "total_processed_requests")]
    pub ledger_value: u64,
    pub worker: WorkerId,
}

/// Runs one request in the current context: workload, then ledger, then metrics.
///
/// Failures are tallied and returned; they happen before the ledger write completes,
/// so the ledger only ever reflects finished increments.
pub(crate) fn execute(
    id: RequestId,
    request: &ProcessRequest,
    discipline: Discipline,
    worker: WorkerId,
    variant: Variant,
    ledger: &Ledger,
    recorder: &Recorder,
) -> Result<ProcessingResult> {
    let start = Instant::now();
    request.workload.run(request.duration);

    let ledger_value = match discipline.apply(ledger) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("{id} on {worker} failed: {e}");
            recorder.record(RequestMetric {
                variant,
                outcome: Outcome::Failure,
                latency: start.elapsed(),
            });
            return Err(e);
        }
    };

    let processing_time = start.elapsed();
    recorder.record(RequestMetric {
        variant,
        outcome: Outcome::Success,
        latency: processing_time,
    });
    tracing::debug!("{id} on {worker} wrote {ledger_value} after {processing_time:?}");

    Ok(ProcessingResult {
        request_id: id,
        processing_time,
        ledger_value,
        worker,
    })
}

/// Durations as fractional milliseconds rounded to two decimals.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = d.as_secs_f64() * 1000.0;
        s.serialize_f64((ms * 100.0).round() / 100.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}
