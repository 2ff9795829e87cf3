//! Chunk assembler for the streaming pipeline.
//!
//! Accumulates raw capture samples into a fixed-capacity ring buffer and
//! emits model-sized chunks when:
//! - an incoming append would overflow the remaining space (flush first,
//!   then write the new samples from offset zero)
//! - the buffer reaches capacity
//! - the owner flushes at end of session
//!
//! The buffer is exclusive to one recording session; there are no
//! concurrent writers.

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::streaming::chunk::AudioChunk;

/// What to do with samples appended while an emitted chunk is still
/// being processed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Discard incoming samples (lossy; the default policy). Callers
    /// needing lossless capture must buffer upstream.
    Drop,
    /// Buffer incoming samples and drain them when processing ends.
    Queue,
    /// Never mark the assembler busy; the session awaits dispatch
    /// completion before feeding more audio. Handled by the session
    /// layer, the assembler itself treats this like an idle `Drop`.
    Block,
}

/// Configuration for the chunk assembler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Ring buffer capacity in samples (default: 30s at 16kHz).
    pub capacity: usize,
    /// Policy for samples arriving while a chunk is in flight.
    pub backpressure: BackpressurePolicy,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::RING_CAPACITY_SAMPLES,
            backpressure: BackpressurePolicy::Drop,
        }
    }
}

/// Assembles capture samples into inference-sized chunks.
///
/// The occupied length never exceeds the configured capacity at any
/// observation point, and no emitted chunk is longer than the capacity.
pub struct ChunkAssembler {
    config: AssemblerConfig,
    /// Ring buffer contents; `len()` is the write cursor.
    buffer: Vec<f32>,
    /// Samples held back by the `Queue` policy while processing.
    pending: Vec<f32>,
    /// Next chunk sequence number.
    next_sequence: u64,
    /// True while an emitted chunk is being processed downstream.
    processing: bool,
    /// Samples discarded by the `Drop` policy.
    dropped_samples: u64,
}

impl ChunkAssembler {
    /// Creates a new assembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(AssemblerConfig::default())
    }

    /// Creates a new assembler with custom configuration.
    pub fn with_config(config: AssemblerConfig) -> Self {
        let capacity = config.capacity;
        Self {
            config,
            buffer: Vec::with_capacity(capacity),
            pending: Vec::new(),
            next_sequence: 0,
            processing: false,
            dropped_samples: 0,
        }
    }

    /// Ring buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Currently occupied length in samples.
    pub fn occupied(&self) -> usize {
        self.buffer.len()
    }

    /// Remaining space before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.config.capacity - self.buffer.len()
    }

    /// Total samples discarded by the `Drop` backpressure policy.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// True while the owner has marked an emitted chunk as in flight.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Appends an arbitrary-length sample slice, returning any chunks
    /// that became ready.
    ///
    /// If the incoming samples do not fit in the remaining space, the
    /// current buffer content is emitted first and the new samples are
    /// written from offset zero; nothing is lost on that path. If the
    /// incoming slice itself exceeds capacity, full-capacity chunks are
    /// emitted as the buffer fills.
    ///
    /// While a chunk is in flight (`is_processing`), the backpressure
    /// policy decides: `Drop` discards the samples, `Queue` holds them
    /// until processing ends.
    pub fn append(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        if samples.is_empty() {
            return Vec::new();
        }

        if self.processing {
            match self.config.backpressure {
                BackpressurePolicy::Drop => {
                    self.dropped_samples += samples.len() as u64;
                    tracing::debug!(dropped = samples.len(), "assembler busy, dropping samples");
                    return Vec::new();
                }
                BackpressurePolicy::Queue => {
                    self.pending.extend_from_slice(samples);
                    return Vec::new();
                }
                // Block is enforced by the session, which never marks the
                // assembler busy; if it does anyway, fall through and write.
                BackpressurePolicy::Block => {}
            }
        }

        self.write(samples)
    }

    /// Marks the start or end of downstream processing for an emitted
    /// chunk. Ending processing drains any samples held back by the
    /// `Queue` policy, which may itself emit chunks.
    pub fn set_processing(&mut self, processing: bool) -> Vec<AudioChunk> {
        self.processing = processing;
        if processing || self.pending.is_empty() {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pending);
        self.write(&pending)
    }

    /// Emits whatever the buffer currently holds, if anything.
    ///
    /// Called at end of session so trailing audio below the capacity
    /// threshold still reaches inference.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    /// Resets the assembler for a fresh session.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.next_sequence = 0;
        self.processing = false;
        self.dropped_samples = 0;
    }

    fn write(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        let mut chunks = Vec::new();

        // Flush-before-write: the current content goes out as one chunk
        // and the incoming samples start at offset zero.
        if samples.len() > self.remaining() && !self.buffer.is_empty() {
            chunks.push(self.emit());
        }

        let mut offset = 0;
        while offset < samples.len() {
            let take = self.remaining().min(samples.len() - offset);
            self.buffer.extend_from_slice(&samples[offset..offset + take]);
            offset += take;

            if self.buffer.len() >= self.config.capacity {
                chunks.push(self.emit());
            }
        }

        chunks
    }

    fn emit(&mut self) -> AudioChunk {
        let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.capacity));
        let chunk = AudioChunk::new(self.next_sequence, samples);
        self.next_sequence += 1;
        chunk
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(capacity: usize, backpressure: BackpressurePolicy) -> ChunkAssembler {
        ChunkAssembler::with_config(AssemblerConfig {
            capacity,
            backpressure,
        })
    }

    #[test]
    fn test_append_in_place_when_space_remains() {
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        let chunks = asm.append(&[0.1; 10_000]);
        assert!(chunks.is_empty());
        assert_eq!(asm.occupied(), 10_000);
    }

    #[test]
    fn test_overflow_flushes_then_writes_from_zero() {
        // Scenario: capacity 16,000; two appends of 10,000 each. The second
        // append flushes the first 10,000-sample buffer, then stores the new
        // samples starting at offset zero.
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        assert!(asm.append(&[0.1; 10_000]).is_empty());

        let chunks = asm.append(&[0.2; 10_000]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].samples.len(), 10_000);
        assert!(chunks[0].samples.iter().all(|&s| s == 0.1));
        assert_eq!(asm.occupied(), 10_000);
    }

    #[test]
    fn test_exact_fill_emits_full_buffer() {
        let mut asm = assembler(8_000, BackpressurePolicy::Drop);
        let chunks = asm.append(&[0.1; 8_000]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 8_000);
        assert_eq!(asm.occupied(), 0);
    }

    #[test]
    fn test_oversize_append_never_exceeds_capacity() {
        let mut asm = assembler(4_000, BackpressurePolicy::Drop);
        asm.append(&[0.1; 1_000]);

        // 10,000 incoming: flush of 1,000, then two full 4,000 chunks,
        // 2,000 left in the buffer.
        let chunks = asm.append(&[0.2; 10_000]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].samples.len(), 1_000);
        assert_eq!(chunks[1].samples.len(), 4_000);
        assert_eq!(chunks[2].samples.len(), 4_000);
        assert_eq!(asm.occupied(), 2_000);
        for c in &chunks {
            assert!(c.samples.len() <= asm.capacity());
        }
    }

    #[test]
    fn test_capacity_invariant_over_many_appends() {
        let mut asm = assembler(5_000, BackpressurePolicy::Drop);
        for len in [100usize, 4_999, 5_000, 1, 7_321, 2_500, 5_001] {
            asm.append(&vec![0.1; len]);
            assert!(asm.occupied() <= asm.capacity());
        }
    }

    #[test]
    fn test_sequence_numbers_increment_without_reuse() {
        let mut asm = assembler(1_000, BackpressurePolicy::Drop);
        let mut sequences = Vec::new();
        for _ in 0..5 {
            for chunk in asm.append(&[0.1; 1_000]) {
                sequences.push(chunk.sequence);
            }
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drop_policy_discards_while_processing() {
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        asm.set_processing(true);

        let chunks = asm.append(&[0.1; 4_000]);
        assert!(chunks.is_empty());
        assert_eq!(asm.occupied(), 0);
        assert_eq!(asm.dropped_samples(), 4_000);

        // Once processing ends, appends land again.
        asm.set_processing(false);
        asm.append(&[0.1; 4_000]);
        assert_eq!(asm.occupied(), 4_000);
        assert_eq!(asm.dropped_samples(), 4_000);
    }

    #[test]
    fn test_queue_policy_drains_after_processing() {
        let mut asm = assembler(16_000, BackpressurePolicy::Queue);
        asm.set_processing(true);

        assert!(asm.append(&[0.1; 4_000]).is_empty());
        assert_eq!(asm.occupied(), 0);
        assert_eq!(asm.dropped_samples(), 0);

        let chunks = asm.set_processing(false);
        assert!(chunks.is_empty());
        assert_eq!(asm.occupied(), 4_000);
    }

    #[test]
    fn test_queue_policy_drain_can_emit() {
        let mut asm = assembler(2_000, BackpressurePolicy::Queue);
        asm.set_processing(true);
        asm.append(&[0.1; 2_000]);
        asm.append(&[0.2; 500]);

        let chunks = asm.set_processing(false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 2_000);
        assert_eq!(asm.occupied(), 500);
    }

    #[test]
    fn test_flush_emits_remainder() {
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        asm.append(&[0.1; 1_234]);

        let chunk = asm.flush().unwrap();
        assert_eq!(chunk.samples.len(), 1_234);
        assert_eq!(asm.occupied(), 0);
        assert!(asm.flush().is_none());
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        assert!(asm.append(&[]).is_empty());
        assert_eq!(asm.occupied(), 0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut asm = assembler(16_000, BackpressurePolicy::Drop);
        asm.append(&[0.1; 100]);
        asm.set_processing(true);
        asm.append(&[0.1; 100]);
        asm.reset();

        assert_eq!(asm.occupied(), 0);
        assert_eq!(asm.dropped_samples(), 0);
        assert!(!asm.is_processing());
        let chunks = asm.append(&vec![0.1; 16_000]);
        assert_eq!(chunks[0].sequence, 0);
    }

    #[test]
    fn test_default_config() {
        let config = AssemblerConfig::default();
        assert_eq!(config.capacity, 480_000);
        assert_eq!(config.backpressure, BackpressurePolicy::Drop);
    }
}
