//! Bounded pool of inference workers.
//!
//! Creates, reuses, and bounds concurrent worker instances. Callers wait
//! on a FIFO-fair semaphore rather than polling: one permit corresponds to
//! one live-or-creatable worker slot, so holding a permit guarantees an
//! idle handle exists or there is room to create one.
//!
//! Timeout policy: load and process share the 30s default budget. A load
//! timeout terminates the partially-created worker. A process timeout
//! aborts and discards the worker — its native call cannot be interrupted,
//! so the handle is never reused — and the freed slot keeps pool capacity
//! from silently shrinking.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::{ModelConfig, PoolConfig};
use crate::engine::model::ModelFactory;
use crate::error::{Result, SottoError};
use crate::streaming::chunk::{AudioChunk, TranscriptionResult};
use crate::worker::protocol::Response;
use crate::worker::worker::WorkerHandle;

/// A worker checked out of the pool, together with its slot permit.
///
/// Returned by `acquire`; must be given back through `release` (after a
/// response) or `discard` (after a failure that poisons the handle).
pub struct PooledWorker {
    handle: WorkerHandle,
    permit: OwnedSemaphorePermit,
}

impl PooledWorker {
    /// The underlying worker handle.
    pub fn handle(&mut self) -> &mut WorkerHandle {
        &mut self.handle
    }
}

struct PoolState {
    idle: Vec<WorkerHandle>,
    /// Live handles: idle plus checked out, including ones mid-load.
    live: usize,
}

/// Bounded pool of inference workers sharing one immutable model config.
pub struct WorkerPool {
    model_config: ModelConfig,
    config: PoolConfig,
    factory: ModelFactory,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    initialized: AtomicBool,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Creates a pool; workers are spawned lazily on first demand.
    pub fn new(model_config: ModelConfig, config: PoolConfig, factory: ModelFactory) -> Self {
        let max_workers = config.max_workers.max(1);
        tracing::info!(max_workers, "worker pool initialized");
        Self {
            model_config,
            config,
            factory,
            permits: Arc::new(Semaphore::new(max_workers)),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
            }),
            initialized: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
        }
    }

    /// Creates a pool backed by Whisper inference.
    #[cfg(feature = "whisper")]
    pub fn with_whisper(model_config: ModelConfig, config: PoolConfig) -> Self {
        use crate::engine::model::SpeechModel;
        use crate::engine::whisper::WhisperModel;

        let factory: ModelFactory = Arc::new(|model_config: &ModelConfig| {
            Ok(Box::new(WhisperModel::load(model_config)?) as Box<dyn SpeechModel>)
        });
        Self::new(model_config, config, factory)
    }

    fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.config.load_timeout_ms)
    }

    fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.config.process_timeout_ms)
    }

    /// Number of live worker handles (idle plus checked out).
    ///
    /// Never exceeds the configured `max_workers`.
    pub fn live_workers(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).live
    }

    /// Checks out an idle worker, creating one if the pool has room.
    ///
    /// Suspends the caller FIFO-fairly while the pool is saturated; this
    /// wait is unbounded. Worker creation is bounded by the load timeout;
    /// on expiry the partially-created worker is terminated.
    pub async fn acquire(&self) -> Result<PooledWorker> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SottoError::NotInitialized);
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SottoError::NotInitialized)?;

        // cleanup() may have raced the permit.
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SottoError::NotInitialized);
        }

        let reusable = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.idle.pop() {
                Some(handle) => Some(handle),
                None => {
                    // Holding a permit guarantees live < max_workers here.
                    state.live += 1;
                    None
                }
            }
        };

        match reusable {
            Some(handle) => Ok(PooledWorker { handle, permit }),
            None => self.create_worker(permit).await,
        }
    }

    async fn create_worker(&self, permit: OwnedSemaphorePermit) -> Result<PooledWorker> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut handle = WorkerHandle::spawn(id, self.factory.clone());

        let loaded = async {
            handle.send_load(self.model_config.clone())?;
            loop {
                match handle.recv().await {
                    Some(Response::ModelLoaded) => return Ok(()),
                    Some(Response::Error(message)) => {
                        return Err(SottoError::Initialization { message });
                    }
                    Some(_) => continue,
                    None => {
                        return Err(SottoError::WorkerGone {
                            message: format!("worker {id} terminated during load"),
                        });
                    }
                }
            }
        };

        let outcome = timeout(self.load_timeout(), loaded).await;
        match outcome {
            Ok(Ok(())) => Ok(PooledWorker { handle, permit }),
            Ok(Err(e)) => {
                self.forget(handle);
                Err(e)
            }
            Err(_) => {
                tracing::warn!(worker = id, "load timed out, terminating worker");
                self.forget(handle);
                Err(SottoError::Timeout {
                    operation: "LOAD_MODEL".to_string(),
                    timeout_ms: self.config.load_timeout_ms,
                })
            }
        }
    }

    /// Returns a worker to the idle set.
    pub fn release(&self, mut worker: PooledWorker) {
        worker.handle.finish();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.initialized.load(Ordering::SeqCst) {
            state.idle.push(worker.handle);
        } else {
            // The pool was cleaned up while this handle was checked out.
            state.live -= 1;
            worker.handle.abort();
        }
        drop(state);
        drop(worker.permit);
    }

    /// Drops a worker whose handle can no longer be trusted.
    pub fn discard(&self, worker: PooledWorker) {
        worker.handle.abort();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.live -= 1;
        drop(state);
        drop(worker.permit);
    }

    fn forget(&self, handle: WorkerHandle) {
        handle.abort();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.live -= 1;
    }

    /// Transcribes one chunk on any available worker.
    ///
    /// Resolves or fails within the process timeout once a worker is held;
    /// waiting for availability is unbounded.
    pub async fn transcribe(&self, chunk: AudioChunk) -> Result<TranscriptionResult> {
        let mut worker = self.acquire().await?;

        if let Err(e) = worker.handle.begin_process(chunk) {
            self.discard(worker);
            return Err(e);
        }

        let awaited = async {
            loop {
                match worker.handle.recv().await {
                    Some(Response::ProcessingStarted) => continue,
                    Some(Response::ProcessingProgress(percent)) => {
                        tracing::trace!(percent, "processing progress");
                        continue;
                    }
                    Some(Response::TranscriptionResult(result)) => return Ok(result),
                    Some(Response::Error(message)) => {
                        return Err(SottoError::Processing { message });
                    }
                    Some(Response::ModelLoaded) => continue,
                    None => {
                        return Err(SottoError::WorkerGone {
                            message: "worker terminated mid-request".to_string(),
                        });
                    }
                }
            }
        };

        let outcome = timeout(self.process_timeout(), awaited).await;
        match outcome {
            Ok(Ok(result)) => {
                self.release(worker);
                Ok(result)
            }
            Ok(Err(e @ SottoError::WorkerGone { .. })) => {
                self.discard(worker);
                Err(e)
            }
            Ok(Err(e)) => {
                // The worker reported the fault and is Ready again; the
                // handle goes back idle and the error surfaces to this
                // caller only.
                self.release(worker);
                Err(e)
            }
            Err(_) => {
                // The native call cannot be interrupted; never reuse the
                // handle. Discarding frees the slot, so capacity is not
                // silently lost.
                tracing::warn!("process timed out, discarding worker");
                self.discard(worker);
                Err(SottoError::Timeout {
                    operation: "PROCESS_AUDIO".to_string(),
                    timeout_ms: self.config.process_timeout_ms,
                })
            }
        }
    }

    /// Aborts every worker and empties the pool.
    ///
    /// Teardown never raises: abort failures are logged and swallowed.
    /// Subsequent `acquire` calls fail with `NotInitialized` until a new
    /// pool is constructed.
    pub fn cleanup(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.permits.close();

        let drained = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let drained: Vec<WorkerHandle> = state.idle.drain(..).collect();
            state.live -= drained.len();
            drained
        };

        tracing::info!(aborted = drained.len(), "pool cleanup");
        for handle in drained {
            // Checked-out handles are aborted when their callers return them.
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::SeqCst) {
            self.cleanup();
        }
    }
}
