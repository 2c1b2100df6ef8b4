//! racelab: serial vs pooled request processing against one shared counter.
//!
//! racelab is a teaching harness. Every request burns a simulated workload and then
//! increments a shared [`Ledger`]. The two dispatchers differ only in where that
//! happens and how the increment is guarded, which makes lost updates and lock
//! contention easy to reproduce and measure.
//!
//! # Architecture
//!
//! - [`workload`]: CPU-bound (spinning) and I/O-bound (sleeping) work behind one
//!   [`Workload`] interface.
//! - [`Ledger`]: the shared integer. `increment_unsafe` is a bare read-pause-write;
//!   `increment_safe` and `reset` do the same under the ledger's own mutex.
//! - [`SerialDispatcher`]: one request at a time on the caller's thread.
//! - [`PooledDispatcher`]: N worker threads, an unbounded queue, and a one-shot channel
//!   per request.
//! - [`Recorder`]: request counts by dispatcher and outcome, plus latency histograms.
//!   Recording never fails a request.
//! - [`loadgen`]: burst and paced load generators built from [`Scenario`]s and
//!   [`Executor`]s.
//! - [`report`]: turns aggregates into [`Report`]s and hands them to [`Reporter`]s.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use racelab::{PoolConfig, PooledDispatcher, ProcessRequest, WorkloadKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), racelab::DispatchError> {
//!     let pool = PooledDispatcher::new(PoolConfig::builder().workers(2).build())?;
//!     let request = ProcessRequest::new(WorkloadKind::Cpu, Duration::from_millis(50));
//!
//!     // Without the lock both requests can read 0 and both write 1.
//!     let (a, b) = tokio::join!(pool.process(request), pool.process(request));
//!     println!("{} {}", a?.ledger_value, b?.ledger_value);
//!     Ok(())
//! }
//! ```
//!
//! See `examples/race.rs` for a runnable comparison of both dispatchers.

/// Metric aggregators
pub mod aggregate;
/// Serial and pooled request dispatch
pub mod dispatcher;
pub mod error;
/// The shared counter
pub mod ledger;
/// Load generation
pub mod loadgen;
/// Single metrics
pub mod metric;
pub mod recorder;
/// Reports and Reporters
pub mod report;
pub mod workload;

pub use aggregate::Aggregate;
pub use dispatcher::{
    Pending, PoolConfig, PooledDispatcher, ProcessRequest, ProcessingResult, RequestId,
    SerialDispatcher, WorkerId,
};
pub use error::{DispatchError, LedgerError, LoadError};
pub use ledger::{Ledger, LedgerConfig};
pub use loadgen::{Executor, Scenario};
pub use metric::{Metric, Outcome, Variant};
pub use recorder::Recorder;
pub use report::{Report, Reporter};
pub use workload::{Workload, WorkloadKind};

/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use racelab_macros::*;
}
