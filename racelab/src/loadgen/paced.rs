//! Paced load: a token governor feeding a fixed set of virtual users.
//!
//! The governor walks a list of [`Stage`]s, each a straight-line ramp from the previous
//! stage's rate to its own `target` over its `duration`. Rather than adding a per-tick
//! amount, it keeps the running total a stage owes: the area under the rate line,
//!
//! ```text
//! owed(t) = from * t + (target - from) * t² / (2 * duration)
//! ```
//!
//! and on every tick releases `floor(owed(t))` minus what it already released. Late or
//! skipped ticks catch up on the next one, and a whole stage always releases exactly
//! `floor(owed(duration))` tokens.
//!
//! Users take one token per call. When the governor is done, users spend whatever tokens
//! are left, finish the call they are in and stop. After each call a user may wait a
//! random think time drawn from `think_time`, the way a locust user waits
//! `between(min, max)`.
use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use rand::Rng;
use tokio::{
    sync::{
        Semaphore,
        watch::{self, Receiver},
    },
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use typed_builder::TypedBuilder;

use super::{Executor, Scenario};
use crate::{aggregate::Aggregate, error::LoadError};

/// One leg of the ramp. `Stage::new(Duration::from_secs(10), 100.0)` ramps to 100 RPS
/// over 10s. A zero `duration` jumps to `target` without releasing anything.
#[derive(Clone, Copy, Debug)]
pub struct Stage {
    pub duration: Duration,
    /// Requests per second. Negative rates count as zero.
    pub target: f64,
}

impl Stage {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }

    /// Tokens this stage owes `elapsed` into it, having started at `from` RPS.
    fn owed(&self, from: f64, elapsed: Duration) -> f64 {
        let total = self.duration.as_secs_f64();
        if total == 0.0 {
            return 0.0;
        }
        let t = elapsed.as_secs_f64().min(total);
        let (from, to) = (from.max(0.0), self.target.max(0.0));
        from * t + (to - from) * t * t / (2.0 * total)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PacedExecutor {
    pub stages: Vec<Stage>,
    /// How often the governor releases tokens.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// Maximum unspent tokens. Bounds the burst after a slow period.
    #[builder(default = Semaphore::MAX_PERMITS)]
    pub bucket_capacity: usize,
    /// Virtual users. Caps how many calls can be in flight at once.
    #[builder(default = num_cpus::get() * 4)]
    pub workers: usize,
    /// Inclusive `(min, max)` pause after each call.
    #[builder(default = (Duration::ZERO, Duration::ZERO))]
    pub think_time: (Duration, Duration),
}

impl<A, F, Fut> Executor<A, F, Fut> for PacedExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate + 'static,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error = LoadError;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<A, Self::Error> {
        if self.workers == 0 {
            return Err(LoadError::ZeroConcurrency);
        }
        let (min, max) = self.think_time;
        if min > max {
            return Err(LoadError::InvalidThinkTime { min, max });
        }

        let (phase_tx, phase) = watch::channel(Phase::Pending);
        let tokens = Arc::new(Semaphore::new(0));
        let governor = Governor {
            stages: self.stages.clone(),
            tick: self.tick,
            capacity: self.bucket_capacity.min(Semaphore::MAX_PERMITS),
            tokens: Arc::clone(&tokens),
        };

        tracing::info!("Spawning {} virtual users...", self.workers);
        let users: Vec<JoinHandle<A>> = (0..self.workers)
            .map(|i| {
                tokio::spawn(virtual_user::<A, F, Fut>(
                    i,
                    phase.clone(),
                    Arc::clone(&tokens),
                    self.think_time,
                    scenario.action.clone(),
                ))
            })
            .collect();

        tracing::info!("Running scenario: {}!", scenario.name);
        phase_tx.send_replace(Phase::Running);
        let released = tokio::spawn(governor.run()).await?;
        tracing::info!("Governor released {released} tokens, draining users...");
        phase_tx.send_replace(Phase::Done);

        let mut final_agg = A::new();
        for res in join_all(users).await {
            match res {
                Ok(agg) => final_agg.merge(agg),
                // Keep the other users' data rather than failing the whole run.
                Err(e) => tracing::error!("Virtual user panicked: {e}"),
            }
        }

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(final_agg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Done,
}

struct Governor {
    stages: Vec<Stage>,
    tick: Duration,
    capacity: usize,
    tokens: Arc<Semaphore>,
}

impl Governor {
    /// Walk every stage and return how many tokens were released in total.
    async fn run(self) -> u64 {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut rate = 0.0;
        let mut released = 0;
        for (i, stage) in self.stages.iter().enumerate() {
            let from = rate;
            rate = stage.target;
            if stage.duration.is_zero() {
                continue;
            }
            tracing::debug!(
                "Stage {}: {from} -> {} RPS over {:?}",
                i + 1,
                stage.target,
                stage.duration
            );

            let began = Instant::now();
            let mut issued = 0u64;
            loop {
                ticker.tick().await;
                let elapsed = began.elapsed().min(stage.duration);
                // Saturating cast; the nudge keeps 9.999999 from flooring to 9.
                let owed = (stage.owed(from, elapsed) + 1e-9) as u64;
                released += self.release(owed.saturating_sub(issued));
                issued = issued.max(owed);
                if elapsed >= stage.duration {
                    break;
                }
            }
        }
        released
    }

    /// Add up to `due` tokens without going over capacity. Returns how many went in.
    fn release(&self, due: u64) -> u64 {
        let room = self.capacity.saturating_sub(self.tokens.available_permits());
        let n = usize::try_from(due).unwrap_or(usize::MAX).min(room);
        if n > 0 {
            self.tokens.add_permits(n);
        }
        n as u64
    }
}

async fn virtual_user<A, F, Fut>(
    i: usize,
    mut phase: Receiver<Phase>,
    tokens: Arc<Semaphore>,
    think_time: (Duration, Duration),
    action: F,
) -> A
where
    A: Aggregate,
    F: Fn() -> Fut,
    Fut: Future<Output = A::Metric>,
{
    let mut agg = A::new();
    if phase.wait_for(|p| *p != Phase::Pending).await.is_err() {
        return agg;
    }
    tracing::debug!("User {i} started.");

    loop {
        // Biased towards tokens so leftovers are spent before `Done` is honoured.
        let permit = tokio::select! {
            biased;
            permit = tokens.acquire() => permit,
            _ = phase.wait_for(|p| *p == Phase::Done) => break,
        };
        match permit {
            // Only the governor adds tokens back.
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        let metric = action().await;
        agg.consume(&metric);

        if let Some(pause) = draw_think_time(think_time) {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = phase.wait_for(|p| *p == Phase::Done) => {}
            }
        }
    }

    tracing::debug!("User {i} shutting down.");
    agg
}

fn draw_think_time((min, max): (Duration, Duration)) -> Option<Duration> {
    if max.is_zero() {
        return None;
    }
    Some(rand::thread_rng().gen_range(min..=max))
}
