//! Load generation: the in-process stand-in for locust and the dashboard's fan-out.
//!
//! A [`Scenario`] names an action, an async closure producing one [`crate::Metric`] per
//! call. An [`Executor`] decides how often and how concurrently the action runs and
//! folds the metrics into an [`Aggregate`].
//!
//! - [`BurstExecutor`] fires a fixed number of calls with bounded concurrency, like
//!   pressing "send 50 requests" on the dashboard.
//! - [`PacedExecutor`] runs virtual users gated by a token-bucket governor that ramps
//!   through [`Stage`]s, with optional think time between calls.
pub mod burst;
pub mod paced;
pub mod scenario;

pub use burst::BurstExecutor;
pub use paced::{PacedExecutor, Stage};
pub use scenario::Scenario;

use crate::aggregate::Aggregate;
use std::future::Future;

/// The runtime hook that executes a [`Scenario`].
///
/// Generic over the aggregate, action and future types so scenarios stay zero-cost
/// closures.
pub trait Executor<A, F, Fut>
where
    Self: Send + Sync + Sized,
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send,
{
    type Error;
    /// Run the scenario to completion and return the merged aggregate.
    fn exec(
        &self,
        scenario: &Scenario<A, F, Fut>,
    ) -> impl Future<Output = Result<A, Self::Error>> + Send;
}
