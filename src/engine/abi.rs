//! Binary interface to the compiled speech model.
//!
//! The native module is an external collaborator: allocation over a shared
//! linear memory region, status-returning `init`/`process` entry points, and
//! a null-terminated transcript string read back from a pointer the module
//! returns. The module imports a monotonic clock and a logging callback from
//! the host.
//!
//! `MockAbi` implements the same contract over an in-process arena with
//! allocation accounting, so marshaling and release-on-error paths are
//! testable without a compiled model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, SottoError};

/// Offset into the module's linear memory region.
pub type NativePtr = u32;

/// Null pointer sentinel in linear memory.
pub const NULL_PTR: NativePtr = 0;

/// Host functions the native module imports.
pub struct NativeImports {
    /// Monotonic clock in milliseconds.
    pub now_ms: Box<dyn Fn() -> u64 + Send>,
    /// Logging callback for native-side diagnostics.
    pub log: Box<dyn Fn(&str) + Send>,
}

impl Default for NativeImports {
    fn default() -> Self {
        let epoch = Instant::now();
        Self {
            now_ms: Box::new(move || epoch.elapsed().as_millis() as u64),
            log: Box::new(|line| tracing::debug!(target: "sotto::native", "{line}")),
        }
    }
}

impl std::fmt::Debug for NativeImports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeImports").finish_non_exhaustive()
    }
}

/// Call interface of one native inference instance.
///
/// One instance is owned exclusively by one worker; nothing here is shared
/// across workers. Every pointer handed out by `malloc` or `get_text` must
/// be returned through `free`/`free_text` before `cleanup`.
pub trait NativeAbi: Send + Sized {
    /// Instantiates the module with a fetched model memory image.
    fn instantiate(model_image: Vec<u8>, imports: NativeImports) -> Result<Self>;

    /// Runtime initialization; zero means ready.
    fn init(&mut self) -> i32;

    /// Allocates `len` bytes of linear memory.
    fn malloc(&mut self, len: usize) -> Result<NativePtr>;

    /// Releases a buffer obtained from `malloc`.
    fn free(&mut self, ptr: NativePtr);

    /// Copies f32 samples into an allocated buffer.
    fn write_samples(&mut self, ptr: NativePtr, samples: &[f32]) -> Result<()>;

    /// Runs inference over `len` samples at `ptr`; zero means success.
    fn process(&mut self, ptr: NativePtr, len: usize, sample_rate: u32) -> i32;

    /// Pointer to the null-terminated decoded transcript, or `NULL_PTR`.
    fn get_text(&mut self) -> NativePtr;

    /// Reads a null-terminated byte string out of linear memory.
    fn read_cstr(&self, ptr: NativePtr) -> Result<String>;

    /// Releases a transcript buffer obtained from `get_text`.
    fn free_text(&mut self, ptr: NativePtr);

    /// Tears down the instance; all native memory is released.
    fn cleanup(&mut self);
}

#[derive(Debug, Default)]
struct MockAbiState {
    arena: HashMap<NativePtr, Vec<u8>>,
    next_ptr: NativePtr,
    text_ptr: NativePtr,
    mallocs: u64,
    frees: u64,
    processed_samples: usize,
    cleaned_up: bool,
}

/// In-process stand-in for the compiled speech model.
///
/// Shares its state behind an `Arc` so tests can keep a handle and inspect
/// allocation accounting after the model has been moved into a worker.
#[derive(Clone, Debug)]
pub struct MockAbi {
    state: Arc<Mutex<MockAbiState>>,
    transcript: String,
    init_status: i32,
    process_status: i32,
    null_text: bool,
    latency: Duration,
}

impl MockAbi {
    /// Creates a well-behaved mock that decodes every chunk to a fixed line.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockAbiState {
                next_ptr: 16,
                ..MockAbiState::default()
            })),
            transcript: "mock transcription".to_string(),
            init_status: 0,
            process_status: 0,
            null_text: false,
            latency: Duration::ZERO,
        }
    }

    /// Configure the transcript returned for every processed chunk.
    pub fn with_transcript(mut self, transcript: &str) -> Self {
        self.transcript = transcript.to_string();
        self
    }

    /// Configure `init` to return a non-zero status.
    pub fn with_init_status(mut self, status: i32) -> Self {
        self.init_status = status;
        self
    }

    /// Configure `process` to return a non-zero status.
    pub fn with_process_status(mut self, status: i32) -> Self {
        self.process_status = status;
        self
    }

    /// Configure `get_text` to return a null pointer.
    pub fn with_null_text(mut self) -> Self {
        self.null_text = true;
        self
    }

    /// Configure a synchronous delay inside `process`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of currently live allocations in the arena.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).arena.len()
    }

    /// Total `malloc`/`get_text` allocations handed out.
    pub fn total_allocations(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mallocs
    }

    /// Total buffers returned through `free`/`free_text`.
    pub fn total_frees(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).frees
    }

    /// Number of samples passed to the last `process` call.
    pub fn processed_samples(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).processed_samples
    }

    /// True once `cleanup` has run.
    pub fn cleaned_up(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).cleaned_up
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockAbiState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockAbi {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeAbi for MockAbi {
    fn instantiate(model_image: Vec<u8>, imports: NativeImports) -> Result<Self> {
        if model_image.is_empty() {
            return Err(SottoError::Initialization {
                message: "empty model image".to_string(),
            });
        }
        (imports.log)("mock module instantiated");
        Ok(Self::new())
    }

    fn init(&mut self) -> i32 {
        self.init_status
    }

    fn malloc(&mut self, len: usize) -> Result<NativePtr> {
        let mut state = self.lock();
        let ptr = state.next_ptr;
        state.next_ptr += len.max(1) as NativePtr;
        state.arena.insert(ptr, vec![0u8; len]);
        state.mallocs += 1;
        Ok(ptr)
    }

    fn free(&mut self, ptr: NativePtr) {
        let mut state = self.lock();
        if state.arena.remove(&ptr).is_some() {
            state.frees += 1;
        }
    }

    fn write_samples(&mut self, ptr: NativePtr, samples: &[f32]) -> Result<()> {
        let mut state = self.lock();
        let block = state.arena.get_mut(&ptr).ok_or_else(|| SottoError::Processing {
            message: format!("write to unallocated pointer {ptr}"),
        })?;
        let bytes = samples.len() * size_of::<f32>();
        if block.len() < bytes {
            return Err(SottoError::Processing {
                message: format!("buffer overrun: {bytes} bytes into {} allocated", block.len()),
            });
        }
        for (i, sample) in samples.iter().enumerate() {
            block[i * 4..i * 4 + 4].copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    fn process(&mut self, ptr: NativePtr, len: usize, _sample_rate: u32) -> i32 {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let mut state = self.lock();
        if !state.arena.contains_key(&ptr) {
            return -1;
        }
        state.processed_samples = len;
        self.process_status
    }

    fn get_text(&mut self) -> NativePtr {
        if self.null_text {
            return NULL_PTR;
        }
        let mut bytes = self.transcript.clone().into_bytes();
        bytes.push(0);
        let mut state = self.lock();
        let ptr = state.next_ptr;
        state.next_ptr += bytes.len() as NativePtr;
        state.arena.insert(ptr, bytes);
        state.mallocs += 1;
        state.text_ptr = ptr;
        ptr
    }

    fn read_cstr(&self, ptr: NativePtr) -> Result<String> {
        let state = self.lock();
        let block = state.arena.get(&ptr).ok_or_else(|| SottoError::Processing {
            message: format!("read from unallocated pointer {ptr}"),
        })?;
        let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        String::from_utf8(block[..end].to_vec()).map_err(|e| SottoError::Processing {
            message: format!("transcript is not valid UTF-8: {e}"),
        })
    }

    fn free_text(&mut self, ptr: NativePtr) {
        self.free(ptr);
    }

    fn cleanup(&mut self) {
        let mut state = self.lock();
        state.arena.clear();
        state.cleaned_up = true;
    }
}
