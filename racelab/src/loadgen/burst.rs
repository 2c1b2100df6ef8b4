use futures::{StreamExt, stream};
use typed_builder::TypedBuilder;

use super::{Executor, Scenario};
use crate::{aggregate::Aggregate, error::LoadError};

/// Fires exactly `requests` calls with at most `concurrency` in flight.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BurstExecutor {
    pub requests: usize,
    #[builder(default = num_cpus::get())]
    pub concurrency: usize,
}

impl<A, F, Fut> Executor<A, F, Fut> for BurstExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send,
{
    type Error = LoadError;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<A, Self::Error> {
        if self.concurrency == 0 {
            return Err(LoadError::ZeroConcurrency);
        }
        tracing::info!(
            "Running scenario: {} ({} requests, {} at a time)",
            scenario.name,
            self.requests,
            self.concurrency
        );

        let agg = stream::iter(0..self.requests)
            .map(|_| (scenario.action)())
            .buffer_unordered(self.concurrency)
            .fold(A::new(), |mut agg, metric| async move {
                agg.consume(&metric);
                agg
            })
            .await;

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(agg)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{aggregate::LoadAggregate, metric::ClientMetric};

    #[tokio::test]
    async fn fires_exactly_the_requested_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let scenario = Scenario::builder()
            .name("count")
            .action({
                let (calls, in_flight, peak) = (calls.clone(), in_flight.clone(), peak.clone());
                move || {
                    let (calls, in_flight, peak) = (calls.clone(), in_flight.clone(), peak.clone());
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        let n = calls.fetch_add(1, Ordering::SeqCst) as u64;
                        ClientMetric {
                            latency: Duration::from_millis(5),
                            success: true,
                            ledger_value: Some(n + 1),
                        }
                    }
                }
            })
            .build();

        let agg: LoadAggregate = BurstExecutor::builder()
            .requests(20)
            .concurrency(4)
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert_eq!(agg.count, 20);
        assert_eq!(agg.ledger_values.len(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let scenario = Scenario::builder()
            .name("never")
            .action(|| async {
                ClientMetric {
                    latency: Duration::ZERO,
                    success: true,
                    ledger_value: None,
                }
            })
            .build();

        let res: Result<LoadAggregate, _> = BurstExecutor::builder()
            .requests(1)
            .concurrency(0)
            .build()
            .exec(&scenario)
            .await;

        assert!(matches!(res, Err(LoadError::ZeroConcurrency)));
    }
}
