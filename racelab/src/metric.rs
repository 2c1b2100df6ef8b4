use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::macros::metric;

/// A `Metric` is a single observation produced by one unit of work.
///
/// Metrics are the most granular data racelab handles. They are folded into an
/// [`crate::Aggregate`], which a [`crate::Report`] later turns into something readable.
///
/// ## Design principles
/// - **Small and cheap to clone:** one is produced per request on the hot path.
/// - **Serializable:** metrics may cross threads or leave the process as JSON.
/// - **Thread-safe:** metrics must be `Send` and `Sync`.
///
/// The [`metric`](crate::macros::metric) attribute derives the required bounds and
/// implements this trait in one line.
///
/// ## Example
/// ```rust
/// use racelab::{Metric, macros::metric};
/// use std::time::Duration;
///
/// #[metric]
/// struct QueueWait {
///     waited: Duration,
/// }
/// ```
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + fmt::Debug + Clone,
{
}

/// Which dispatcher produced a sample. Serialized as the `A`/`B` labels used by the
/// dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variant {
    #[serde(rename = "A")]
    Serial,
    #[serde(rename = "B")]
    Pooled,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Serial => f.write_str("A"),
            Variant::Pooled => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Server-side sample: one per request that reached a dispatcher.
#[metric]
pub struct RequestMetric {
    pub variant: Variant,
    pub outcome: Outcome,
    /// Only meaningful for successful requests.
    pub latency: Duration,
}

/// Client-side sample taken by the load generator around one call.
#[metric]
pub struct ClientMetric {
    pub latency: Duration,
    pub success: bool,
    /// Ledger value the server reported, when the call succeeded.
    pub ledger_value: Option<u64>,
}
