//! Inference worker: one dedicated OS thread owning one model instance.
//!
//! The worker runs a synchronous, non-preemptible loop: requests arrive
//! over a crossbeam channel, responses leave over a tokio unbounded sender
//! so the async orchestrator can await them. Faults never cross the
//! message boundary as panics; they are converted into `ERROR` responses.
//!
//! State machine: Uninitialized → Loading → Ready → Processing → Ready →
//! … → Terminated. Load and process transitions each emit exactly one
//! response; `ABORT` is observed as the response channel closing, `RESET`
//! silently returns the worker to `Uninitialized`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::ModelConfig;
use crate::engine::model::{ModelFactory, SpeechModel};
use crate::error::{Result, SottoError};
use crate::streaming::chunk::AudioChunk;
use crate::worker::protocol::{Request, Response};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Loading,
    Ready,
    Processing,
    Terminated,
}

/// Pool-managed reference to one live worker thread.
///
/// `busy` is true for the exact span of one in-flight request; a second
/// dispatch while busy is rejected locally, nothing is sent to the thread.
pub struct WorkerHandle {
    id: u64,
    busy: bool,
    last_used_at: Instant,
    requests: crossbeam_channel::Sender<Request>,
    responses: mpsc::UnboundedReceiver<Response>,
    _thread: std::thread::JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns a worker thread with its own model factory.
    ///
    /// The thread idles in `Uninitialized` until it receives `LoadModel`.
    pub fn spawn(id: u64, factory: ModelFactory) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<Request>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<Response>();

        let thread = std::thread::Builder::new()
            .name(format!("sotto-worker-{id}"))
            .spawn(move || {
                WorkerLoop::new(id, factory).run(request_rx, response_tx);
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"));

        Self {
            id,
            busy: false,
            last_used_at: Instant::now(),
            requests: request_tx,
            responses: response_rx,
            _thread: thread,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Sends `LoadModel` to the worker thread.
    pub fn send_load(&mut self, config: ModelConfig) -> Result<()> {
        self.last_used_at = Instant::now();
        self.requests
            .send(Request::LoadModel(config))
            .map_err(|_| SottoError::WorkerGone {
                message: format!("worker {} request channel closed", self.id),
            })
    }

    /// Dispatches one chunk, marking the handle busy for its span.
    ///
    /// Rejected locally with `WorkerBusy` if a request is already in
    /// flight; the protocol violation never reaches the worker.
    pub fn begin_process(&mut self, chunk: AudioChunk) -> Result<()> {
        if self.busy {
            return Err(SottoError::WorkerBusy { id: self.id });
        }
        self.busy = true;
        self.last_used_at = Instant::now();
        self.requests
            .send(Request::ProcessAudio(chunk))
            .map_err(|_| SottoError::WorkerGone {
                message: format!("worker {} request channel closed", self.id),
            })
    }

    /// Marks the in-flight request finished; called by the pool after a
    /// response or a failure on this handle.
    pub fn finish(&mut self) {
        self.busy = false;
        self.last_used_at = Instant::now();
    }

    /// Awaits the next response from the worker thread.
    ///
    /// Returns `None` once the worker has terminated.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Destroys the worker's native instance and terminates its thread.
    ///
    /// Best-effort: a worker that is already gone is not an error.
    pub fn abort(&self) {
        if self.requests.send(Request::Abort).is_err() {
            tracing::debug!(worker = self.id, "abort: worker already terminated");
        }
    }

    /// Sends `Reset`, returning the worker to `Uninitialized`.
    pub fn reset(&mut self) -> Result<()> {
        self.busy = false;
        self.requests
            .send(Request::Reset)
            .map_err(|_| SottoError::WorkerGone {
                message: format!("worker {} request channel closed", self.id),
            })
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Closing the request channel alone would stop the thread, but an
        // explicit abort destroys the native instance promptly.
        self.abort();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

/// The state machine running on the worker thread.
struct WorkerLoop {
    id: u64,
    factory: ModelFactory,
    state: WorkerState,
    model: Option<Box<dyn SpeechModel>>,
}

impl WorkerLoop {
    fn new(id: u64, factory: ModelFactory) -> Self {
        Self {
            id,
            factory,
            state: WorkerState::Uninitialized,
            model: None,
        }
    }

    fn run(
        mut self,
        requests: crossbeam_channel::Receiver<Request>,
        responses: mpsc::UnboundedSender<Response>,
    ) {
        tracing::debug!(worker = self.id, "worker thread started");

        while let Ok(request) = requests.recv() {
            match request {
                Request::LoadModel(config) => {
                    let response = self.load(&config);
                    if responses.send(response).is_err() {
                        break;
                    }
                }
                Request::ProcessAudio(chunk) => {
                    if self.state != WorkerState::Ready || self.model.is_none() {
                        let message = SottoError::NotInitialized.to_string();
                        if responses.send(Response::Error(message)).is_err() {
                            break;
                        }
                        continue;
                    }

                    self.state = WorkerState::Processing;
                    if responses.send(Response::ProcessingStarted).is_err() {
                        break;
                    }

                    let response = self.process(&chunk);
                    if responses.send(response).is_err() {
                        break;
                    }
                }
                Request::Reset => {
                    tracing::debug!(worker = self.id, "reset: destroying native instance");
                    self.model = None;
                    self.state = WorkerState::Uninitialized;
                }
                Request::Abort => {
                    tracing::debug!(worker = self.id, "abort: terminating");
                    self.model = None;
                    self.state = WorkerState::Terminated;
                    break;
                }
            }
        }

        // Orchestrator gone or aborted: the native instance is destroyed
        // before the thread exits.
        self.model = None;
    }

    fn load(&mut self, config: &ModelConfig) -> Response {
        if self.state != WorkerState::Uninitialized {
            return Response::Error(format!(
                "worker {} cannot load a model in state {:?}",
                self.id, self.state
            ));
        }

        self.state = WorkerState::Loading;
        let factory = &self.factory;
        let loaded = catch_unwind(AssertUnwindSafe(|| factory(config)));

        match loaded {
            Ok(Ok(model)) => {
                tracing::info!(worker = self.id, model = model.model_name(), "model loaded");
                self.model = Some(model);
                self.state = WorkerState::Ready;
                Response::ModelLoaded
            }
            Ok(Err(e)) => {
                self.state = WorkerState::Uninitialized;
                Response::Error(e.to_string())
            }
            Err(_) => {
                self.state = WorkerState::Uninitialized;
                Response::Error("model factory panicked".to_string())
            }
        }
    }

    fn process(&mut self, chunk: &AudioChunk) -> Response {
        let model = match self.model.as_mut() {
            Some(model) => model,
            None => {
                self.state = WorkerState::Uninitialized;
                return Response::Error(SottoError::NotInitialized.to_string());
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| model.transcribe(&chunk.samples)));
        match outcome {
            Ok(Ok(result)) => {
                self.state = WorkerState::Ready;
                Response::TranscriptionResult(result)
            }
            Ok(Err(e)) => {
                self.state = WorkerState::Ready;
                Response::Error(e.to_string())
            }
            Err(_) => {
                // The model may be inconsistent after a panic; discard it.
                tracing::warn!(worker = self.id, "model panicked during inference");
                self.model = None;
                self.state = WorkerState::Uninitialized;
                Response::Error("inference panicked".to_string())
            }
        }
    }
}
