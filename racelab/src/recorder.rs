use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    aggregate::{Aggregate, DispatchAggregate},
    metric::{Outcome, RequestMetric, Variant},
};

/// Process-wide tallies for both dispatchers.
///
/// Purely observational: recording never fails a request. A lock poisoned by a panicking
/// writer is logged once and then recovered, so later samples are still counted.
#[derive(Debug, Default)]
pub struct Recorder {
    inner: Mutex<DispatchAggregate>,
    poison_reported: AtomicBool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the request and, when it succeeded, observe its latency.
    pub fn record(&self, metric: RequestMetric) {
        self.write("record").consume(&metric);
    }

    pub fn increment(&self, variant: Variant, outcome: Outcome) {
        self.write("increment").increment(variant, outcome);
    }

    pub fn observe_latency(&self, variant: Variant, latency: Duration) {
        self.write("observe_latency").observe_latency(variant, latency);
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> DispatchAggregate {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, op: &str) -> MutexGuard<'_, DispatchAggregate> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            if !self.poison_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!("Recorder lock poisoned during {op}, recovering");
            }
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn tallies_by_variant_and_outcome() {
        let recorder = Recorder::new();
        recorder.record(RequestMetric {
            variant: Variant::Serial,
            outcome: Outcome::Success,
            latency: Duration::from_millis(50),
        });
        recorder.increment(Variant::Pooled, Outcome::Failure);
        recorder.observe_latency(Variant::Pooled, Duration::from_millis(120));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.count(Variant::Serial, Outcome::Success), 1);
        assert_eq!(snapshot.count(Variant::Pooled, Outcome::Failure), 1);
        assert_eq!(snapshot.latency[&Variant::Pooled].count, 1);
        assert_eq!(snapshot.latency[&Variant::Serial].sum, Duration::from_millis(50));
    }

    #[test]
    fn snapshot_is_detached() {
        let recorder = Recorder::new();
        let before = recorder.snapshot();
        recorder.increment(Variant::Serial, Outcome::Success);

        assert_eq!(before.count(Variant::Serial, Outcome::Success), 0);
        assert_eq!(recorder.snapshot().count(Variant::Serial, Outcome::Success), 1);
    }

    #[test]
    fn poisoned_recorder_keeps_counting() {
        let recorder = Arc::new(Recorder::new());
        recorder.increment(Variant::Pooled, Outcome::Success);
        let poisoner = Arc::clone(&recorder);
        let _ = thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the recorder");
        })
        .join();

        recorder.increment(Variant::Pooled, Outcome::Success);
        recorder.record(RequestMetric {
            variant: Variant::Pooled,
            outcome: Outcome::Success,
            latency: Duration::from_millis(1),
        });
        recorder.observe_latency(Variant::Serial, Duration::from_millis(2));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.count(Variant::Pooled, Outcome::Success), 3);
        assert_eq!(snapshot.latency[&Variant::Pooled].count, 1);
        assert_eq!(snapshot.latency[&Variant::Serial].count, 1);
        assert!(recorder.poison_reported.load(Ordering::Relaxed));
    }

    #[test]
    fn concurrent_recording_is_exact() {
        let recorder = Recorder::new();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        recorder.increment(Variant::Pooled, Outcome::Success);
                    }
                });
            }
        });

        assert_eq!(recorder.snapshot().count(Variant::Pooled, Outcome::Success), 800);
    }
}
