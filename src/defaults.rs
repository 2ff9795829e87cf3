//! Default configuration constants for sotto.
//!
//! Shared constants used across configuration types to ensure consistency
//! and eliminate duplication.

use std::time::Duration;

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Ring buffer capacity in samples (30 seconds of audio at 16kHz).
///
/// One assembler buffer is at most one model-sized inference unit; Whisper
/// operates on windows of up to 30 seconds.
pub const RING_CAPACITY_SAMPLES: usize = 30 * SAMPLE_RATE as usize;

/// Default Voice Activity Detection (VAD) threshold.
///
/// RMS-based threshold (0.0 to 1.0) that determines when audio is considered
/// speech. Tuned for typical microphone input levels.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Minimum RMS energy for a chunk to be worth transcribing.
///
/// Chunks below this are silence/ambient noise and are skipped before
/// dispatch. Set 20x lower than the VAD speech threshold so only truly
/// silent chunks are rejected.
pub const MIN_ENERGY_FOR_TRANSCRIPTION: f32 = 0.001;

/// Default language code for transcription.
///
/// "auto" lets the model detect the spoken language. Set to a specific
/// ISO code (e.g., "en", "de") to force a language.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Timeout budget for loading a model into a worker.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout budget for a single inference request.
pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Lower bound on the worker pool size when derived from host parallelism.
pub const MIN_POOL_WORKERS: usize = 4;

/// Default worker pool size: host parallelism with a floor of 4.
///
/// The pool takes this as an explicit configuration value at construction
/// so sizing stays deterministic and testable.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_POOL_WORKERS)
        .max(MIN_POOL_WORKERS)
}

/// Default thread count for a single inference instance.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
