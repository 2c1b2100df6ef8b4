//! The pooled dispatcher: a fixed set of worker threads behind one unbounded queue.
//!
//! # Flow
//! 1. [`PooledDispatcher::submit`] wraps the request with a fresh one-shot sender,
//!    pushes it onto the queue and returns a [`Pending`] at once. The caller's context
//!    never blocks on the work itself.
//! 2. Each worker thread takes turns on the shared receiver, runs the workload, bumps
//!    the ledger with the discipline the request asked for, records metrics and sends
//!    the result down that request's own channel.
//! 3. [`Pending::wait`] resolves to exactly that result.
//!
//! There is no backpressure. When all workers are busy the queue grows and latency
//! grows with it. Nothing is rejected.
//!
//! # Notes
//! - Workers are OS threads, not async tasks, so a CPU-bound request holds a core and an
//!   I/O-bound one parks its thread in the kernel.
//! - A panic inside a job is caught at the job boundary. The worker keeps serving, and
//!   the caller sees [`DispatchError::WorkerLost`].
//! - Dropping the dispatcher closes the queue and joins every worker after the queue
//!   drains. Requests already queued still complete.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use typed_builder::TypedBuilder;

use crate::{
    error::{DispatchError, Result},
    ledger::{DEFAULT_RACE_WINDOW, Ledger, LedgerConfig},
    metric::{Outcome, RequestMetric, Variant},
    recorder::Recorder,
};

use super::{ProcessRequest, ProcessingResult, RequestId, WorkerId, execute};

pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone, TypedBuilder)]
pub struct PoolConfig {
    /// Number of worker threads. Fixed for the life of the pool.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Race window of the ledger the pool creates. Ignored by
    /// [`PooledDispatcher::with_parts`], which takes an existing ledger.
    #[builder(default = DEFAULT_RACE_WINDOW)]
    pub race_window: Duration,
    /// Worker threads are named `{thread_name}-{slot}`.
    #[builder(default = "racelab-worker".to_string(), setter(into))]
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Job {
    id: RequestId,
    request: ProcessRequest,
    reply: oneshot::Sender<Result<ProcessingResult>>,
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// A request that has been queued and will complete on some worker.
#[derive(Debug)]
pub struct Pending {
    id: RequestId,
    rx: oneshot::Receiver<Result<ProcessingResult>>,
}

impl Pending {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for this request's result.
    pub async fn wait(self) -> Result<ProcessingResult> {
        let Pending { id, rx } = self;
        rx.await.unwrap_or(Err(DispatchError::WorkerLost(id)))
    }

    /// Blocking form of [`Pending::wait`]. Panics if called from inside an async
    /// runtime, like [`oneshot::Receiver::blocking_recv`].
    pub fn blocking_wait(self) -> Result<ProcessingResult> {
        let Pending { id, rx } = self;
        rx.blocking_recv().unwrap_or(Err(DispatchError::WorkerLost(id)))
    }
}

#[derive(Debug)]
pub struct PooledDispatcher {
    sender: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    ledger: Arc<Ledger>,
    recorder: Arc<Recorder>,
    queued: Arc<AtomicUsize>,
}

impl PooledDispatcher {
    /// Spawn a pool with its own ledger and recorder.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let ledger = Ledger::new(
            LedgerConfig::builder()
                .race_window(config.race_window)
                .build(),
        );
        Self::with_parts(config, Arc::new(ledger), Arc::new(Recorder::new()))
    }

    /// Spawn a pool sharing an existing ledger and recorder.
    pub fn with_parts(
        config: PoolConfig,
        ledger: Arc<Ledger>,
        recorder: Arc<Recorder>,
    ) -> Result<Self> {
        let workers = if config.workers == 0 {
            tracing::warn!("Pool configured with 0 workers, using 1");
            1
        } else {
            config.workers
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));

        tracing::info!("Spawning {workers} workers...");
        let mut pool = Self {
            sender: Some(tx),
            workers: Vec::with_capacity(workers),
            ledger,
            recorder,
            queued,
        };
        for slot in 0..workers {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&pool.ledger);
            let recorder = Arc::clone(&pool.recorder);
            let queued = Arc::clone(&pool.queued);
            let handle = thread::Builder::new()
                .name(format!("{}-{slot}", config.thread_name))
                .spawn(move || worker_loop(slot, queue, ledger, recorder, queued))
                .map_err(|e| DispatchError::Spawn {
                    slot,
                    reason: e.to_string(),
                })?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Requests accepted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Queue `request` and return a handle to its result. Never blocks.
    pub fn submit(&self, request: ProcessRequest) -> Result<Pending> {
        let sender = self.sender.as_ref().ok_or(DispatchError::PoolClosed)?;
        let id = RequestId::next();
        let (reply, rx) = oneshot::channel();

        self.queued.fetch_add(1, Ordering::Relaxed);
        if sender.send(Job { id, request, reply }).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::PoolClosed);
        }
        tracing::debug!("Queued {id} ({} {:?})", request.workload, request.duration);

        Ok(Pending { id, rx })
    }

    /// Submit and wait.
    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessingResult> {
        self.submit(request)?.wait().await
    }

    pub fn reset(&self) -> Result<()> {
        Ok(self.ledger.reset()?)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Stop accepting work, let the queue drain and join the workers.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        tracing::info!("Closing pool, waiting for {} workers...", self.workers.len());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread exited by panic");
            }
        }
    }
}

impl Drop for PooledDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    slot: usize,
    queue: SharedQueue,
    ledger: Arc<Ledger>,
    recorder: Arc<Recorder>,
    queued: Arc<AtomicUsize>,
) {
    let worker = WorkerId::Slot(slot);
    tracing::debug!("Worker {slot} started.");

    loop {
        // Only the receive happens under the queue lock; the job runs outside it.
        let job = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocking_recv();
        let Some(Job { id, request, reply }) = job else {
            break;
        };
        queued.fetch_sub(1, Ordering::Relaxed);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            execute(
                id,
                &request,
                request.discipline(),
                worker,
                Variant::Pooled,
                &ledger,
                &recorder,
            )
        }));

        match outcome {
            Ok(result) => {
                if reply.send(result).is_err() {
                    tracing::debug!("Caller for {id} stopped waiting.");
                }
            }
            Err(_) => {
                tracing::error!("Worker {slot} panicked while processing {id}");
                recorder.record(RequestMetric {
                    variant: Variant::Pooled,
                    outcome: Outcome::Failure,
                    latency: Duration::ZERO,
                });
                // Dropping `reply` tells the caller the worker lost its request.
                drop(reply);
            }
        }
    }

    tracing::debug!("Worker {slot} shutting down.");
}
