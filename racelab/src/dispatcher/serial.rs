use std::sync::Arc;

use crate::{error::Result, ledger::Ledger, metric::Variant, recorder::Recorder};

use super::{Discipline, ProcessRequest, ProcessingResult, RequestId, WorkerId, execute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialState {
    Idle,
    Processing,
}

/// Runs every request inline on the calling thread.
///
/// `process` takes `&mut self`, so a second request cannot start until the first
/// returns. Callers that share one across tasks must serialize access themselves,
/// which is exactly the single-worker server being modelled.
#[derive(Debug)]
pub struct SerialDispatcher {
    ledger: Arc<Ledger>,
    recorder: Arc<Recorder>,
    worker: WorkerId,
    state: SerialState,
}

impl SerialDispatcher {
    pub fn new(ledger: Arc<Ledger>, recorder: Arc<Recorder>) -> Self {
        Self {
            ledger,
            recorder,
            worker: WorkerId::Process(std::process::id()),
            state: SerialState::Idle,
        }
    }

    pub fn state(&self) -> SerialState {
        self.state
    }

    /// Run `request` to completion. `use_lock` is ignored: only one request is ever in
    /// flight, so the increment is unsynchronized.
    ///
    /// The state is back to [`SerialState::Idle`] when this returns or unwinds.
    pub fn process(&mut self, request: ProcessRequest) -> Result<ProcessingResult> {
        let _busy = Busy::enter(&mut self.state);
        execute(
            RequestId::next(),
            &request,
            Discipline::Unsynchronized,
            self.worker,
            Variant::Serial,
            &self.ledger,
            &self.recorder,
        )
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
}

/// Holds the dispatcher in `Processing` for as long as it lives.
struct Busy<'a>(&'a mut SerialState);

impl<'a> Busy<'a> {
    fn enter(state: &'a mut SerialState) -> Self {
        *state = SerialState::Processing;
        Self(state)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        *self.0 = SerialState::Idle;
    }
}

impl Default for SerialDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(Ledger::default()), Arc::new(Recorder::new()))
    }
}
