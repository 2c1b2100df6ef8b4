use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::BTreeMap, fmt::Debug, future::Future, time::Duration};

use crate::{
    Aggregate,
    aggregate::{DispatchAggregate, LoadAggregate},
    metric::Variant,
};

/// A [`Report`] is the processed form of an [`Aggregate`].
///
/// Reports derive the final numbers (ratios, means, percentiles) from an aggregate.
/// They are plain data: no I/O, built with a [`From<A>`] implementation and handed to
/// a [`Reporter`].
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and does something visible with it.
///
/// Reporters are the I/O boundary. Keeping them separate lets the
/// metric → aggregate → report pipeline stay pure.
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

/// Per-dispatcher summary of a [`DispatchAggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub requests: u64,
    pub failures: u64,
    /// Percentage of requests that completed their increment.
    pub success_ratio: f64,
    pub mean_latency: Option<Duration>,
    /// Upper bound, in seconds, of the bucket holding the median.
    pub p50_upper_bound_secs: Option<f64>,
    pub p95_upper_bound_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub variants: BTreeMap<Variant, VariantSummary>,
}

impl From<DispatchAggregate> for DispatchReport {
    fn from(value: DispatchAggregate) -> Self {
        let mut variants = BTreeMap::new();
        for (variant, counts) in &value.requests_total {
            let hist = value.latency.get(variant);
            let total = counts.total();
            variants.insert(
                *variant,
                VariantSummary {
                    requests: total,
                    failures: counts.failure,
                    success_ratio: ratio(counts.success, total),
                    mean_latency: hist.and_then(|h| mean(h.sum, h.count)),
                    p50_upper_bound_secs: hist.and_then(|h| h.quantile_upper_bound(0.5)),
                    p95_upper_bound_secs: hist.and_then(|h| h.quantile_upper_bound(0.95)),
                },
            );
        }
        Self { variants }
    }
}
impl Report<DispatchAggregate> for DispatchReport {}

/// Client-side view of a load run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub count: u64,
    pub failures: u64,
    pub success_ratio: f64,
    pub average_latency: Option<Duration>,
    pub max_latency: Duration,
    /// Different ledger values reported back. Below `count - failures` means at least
    /// two responses saw the same value.
    pub distinct_ledger_values: u64,
    /// Ledger values reported by more than one response, with how often they were seen.
    pub duplicated_ledger_values: BTreeMap<u64, u64>,
    /// Filled in by [`LoadReport::with_wall_time`].
    pub throughput_rps: Option<f64>,
}

impl LoadReport {
    pub fn with_wall_time(mut self, elapsed: Duration) -> Self {
        if !elapsed.is_zero() {
            self.throughput_rps = Some(self.count as f64 / elapsed.as_secs_f64());
        }
        self
    }
}

impl From<LoadAggregate> for LoadReport {
    fn from(value: LoadAggregate) -> Self {
        Self {
            count: value.count,
            failures: value.count - value.success_count,
            success_ratio: ratio(value.success_count, value.count),
            average_latency: mean(value.total_latency, value.count),
            max_latency: value.max_latency,
            distinct_ledger_values: value.ledger_values.len() as u64,
            duplicated_ledger_values: value
                .ledger_values
                .into_iter()
                .filter(|(_, seen)| *seen > 1)
                .collect(),
            throughput_rps: None,
        }
    }
}
impl Report<LoadAggregate> for LoadReport {}

/// Updates missing from the ledger: completed increments minus what it holds.
/// Only meaningful when the ledger started at zero and nothing reset it mid-run.
pub fn lost_updates(completed_increments: u64, ledger_value: u64) -> u64 {
    completed_increments.saturating_sub(ledger_value)
}

fn mean(sum: Duration, count: u64) -> Option<Duration> {
    (count > 0).then(|| Duration::from_nanos((sum.as_nanos() / u128::from(count)) as u64))
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub struct StdoutReporter;

impl<A: Aggregate, R: Report<A>> Reporter<A, R> for StdoutReporter {
    async fn report(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
        println!("{report:#?}");
        Ok(())
    }
}

pub struct JsonReporter;

impl<A: Aggregate, R: Report<A>> Reporter<A, R> for JsonReporter {
    async fn report(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
        let value = serde_json::to_string_pretty(report)?;
        println!("{value}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{ClientMetric, Outcome, RequestMetric};

    #[test]
    fn dispatch_report_derives_per_variant_numbers() {
        let mut agg = DispatchAggregate::new();
        for ms in [40, 60, 80] {
            agg.consume(&RequestMetric {
                variant: Variant::Pooled,
                outcome: Outcome::Success,
                latency: Duration::from_millis(ms),
            });
        }
        agg.increment(Variant::Pooled, Outcome::Failure);

        let report = DispatchReport::from(agg);
        let pooled = &report.variants[&Variant::Pooled];

        assert_eq!(pooled.requests, 4);
        assert_eq!(pooled.failures, 1);
        assert_eq!(pooled.success_ratio, 75.0);
        assert_eq!(pooled.mean_latency, Some(Duration::from_millis(60)));
        assert_eq!(pooled.p50_upper_bound_secs, Some(0.075));
        assert!(!report.variants.contains_key(&Variant::Serial));
    }

    #[test]
    fn load_report_exposes_duplicates() {
        let mut agg = LoadAggregate::new();
        for value in [1, 1, 2, 3, 3, 3] {
            agg.consume(&ClientMetric {
                latency: Duration::from_millis(10),
                success: true,
                ledger_value: Some(value),
            });
        }

        let report = LoadReport::from(agg).with_wall_time(Duration::from_secs(2));

        assert_eq!(report.count, 6);
        assert_eq!(report.failures, 0);
        assert_eq!(report.distinct_ledger_values, 3);
        assert_eq!(
            report.duplicated_ledger_values,
            BTreeMap::from([(1, 2), (3, 3)])
        );
        assert_eq!(report.throughput_rps, Some(3.0));
        assert_eq!(lost_updates(6, 3), 3);
    }

    #[test]
    fn empty_aggregates_do_not_divide_by_zero() {
        let report = LoadReport::from(LoadAggregate::new());
        assert_eq!(report.average_latency, None);
        assert_eq!(report.success_ratio, 0.0);
        assert!(DispatchReport::from(DispatchAggregate::new()).variants.is_empty());
    }

    #[tokio::test]
    async fn reporters_accept_both_reports() {
        let report = DispatchReport::from(DispatchAggregate::new());
        Reporter::<DispatchAggregate, _>::report(&JsonReporter, &report)
            .await
            .unwrap();
        let load = LoadReport::from(LoadAggregate::new());
        Reporter::<LoadAggregate, _>::report(&StdoutReporter, &load)
            .await
            .unwrap();
    }
}
