use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Metric,
    macros::aggregate,
    metric::{ClientMetric, Outcome, RequestMetric, Variant},
};

/// The `Aggregate` trait defines how raw [`Metric`] values are collected into a
/// compact, mergeable representation.
///
/// Aggregates store counts, sums and histograms. Derived statistics such as means and
/// percentiles belong in a [`crate::Report`], which is built from an aggregate.
///
/// # Implementor notes
/// - `merge` must be associative and commutative: worker-local aggregates are merged in
///   arbitrary order.
/// - Keep `consume` cheap. It runs once per request.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Upper bounds, in seconds, of the latency buckets. Same layout as the Prometheus
/// client's default histogram.
pub const LATENCY_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Non-cumulative latency histogram: `counts[i]` holds samples in
/// `(LATENCY_BUCKETS[i-1], LATENCY_BUCKETS[i]]`, and the last slot is the `+Inf` overflow.
#[aggregate]
pub struct LatencyHistogram {
    pub counts: Vec<u64>,
    pub sum: Duration,
    pub count: u64,
}

impl LatencyHistogram {
    pub fn observe(&mut self, latency: Duration) {
        if self.counts.len() != LATENCY_BUCKETS.len() + 1 {
            self.counts.resize(LATENCY_BUCKETS.len() + 1, 0);
        }
        let secs = latency.as_secs_f64();
        let idx = LATENCY_BUCKETS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.counts[idx] += 1;
        self.sum += latency;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &LatencyHistogram) {
        if self.counts.len() < other.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Upper bound of the bucket holding quantile `q`, or `None` when empty.
    /// Samples in the overflow bucket report `f64::INFINITY`.
    pub fn quantile_upper_bound(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let rank = ((q.clamp(0.0, 1.0) * self.count as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for (i, c) in self.counts.iter().enumerate() {
            seen += c;
            if seen >= rank {
                return Some(LATENCY_BUCKETS.get(i).copied().unwrap_or(f64::INFINITY));
            }
        }
        Some(f64::INFINITY)
    }
}

#[aggregate]
pub struct OutcomeCounts {
    pub success: u64,
    pub failure: u64,
}

impl OutcomeCounts {
    pub fn bump(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failure => self.failure += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }
}

/// Server-side tallies: request counts by variant and outcome, latency by variant.
#[aggregate]
pub struct DispatchAggregate {
    pub requests_total: BTreeMap<Variant, OutcomeCounts>,
    pub latency: BTreeMap<Variant, LatencyHistogram>,
}

impl DispatchAggregate {
    pub fn increment(&mut self, variant: Variant, outcome: Outcome) {
        self.requests_total
            .entry(variant)
            .or_default()
            .bump(outcome);
    }

    pub fn observe_latency(&mut self, variant: Variant, latency: Duration) {
        self.latency.entry(variant).or_default().observe(latency);
    }

    pub fn count(&self, variant: Variant, outcome: Outcome) -> u64 {
        self.requests_total
            .get(&variant)
            .map(|c| match outcome {
                Outcome::Success => c.success,
                Outcome::Failure => c.failure,
            })
            .unwrap_or(0)
    }
}

impl Aggregate for DispatchAggregate {
    type Metric = RequestMetric;

    fn new() -> Self {
        Self::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.increment(metric.variant, metric.outcome);
        if metric.outcome == Outcome::Success {
            self.observe_latency(metric.variant, metric.latency);
        }
    }

    fn merge(&mut self, other: Self) {
        for (variant, counts) in other.requests_total {
            let mine = self.requests_total.entry(variant).or_default();
            mine.success += counts.success;
            mine.failure += counts.failure;
        }
        for (variant, hist) in other.latency {
            self.latency.entry(variant).or_default().merge(&hist);
        }
    }
}

/// Client-side tallies collected by the load generator.
#[aggregate]
pub struct LoadAggregate {
    pub count: u64,
    pub success_count: u64,
    pub total_latency: Duration,
    pub max_latency: Duration,
    /// How many responses reported each ledger value.
    pub ledger_values: BTreeMap<u64, u64>,
}

impl Aggregate for LoadAggregate {
    type Metric = ClientMetric;

    fn new() -> Self {
        Self::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.count += 1;
        if metric.success {
            self.success_count += 1;
        }
        self.total_latency += metric.latency;
        self.max_latency = self.max_latency.max(metric.latency);
        if let Some(value) = metric.ledger_value {
            *self.ledger_values.entry(value).or_default() += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.success_count += other.success_count;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
        for (value, seen) in other.ledger_values {
            *self.ledger_values.entry(value).or_default() += seen;
        }
    }
}
