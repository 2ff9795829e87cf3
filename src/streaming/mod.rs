//! Streaming pipeline: chunk assembly and session orchestration.

pub mod assembler;
pub mod chunk;
pub mod session;

pub use assembler::{AssemblerConfig, BackpressurePolicy, ChunkAssembler};
pub use chunk::{AudioChunk, TranscriptionResult, TranscriptionSegment};
pub use session::{SessionEvent, StreamingSession};
