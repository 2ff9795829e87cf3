//! Chunk and transcript types flowing through the pipeline.

use serde::{Deserialize, Serialize};

use crate::defaults;

/// A fixed-size (or flush-triggered) contiguous span of audio samples
/// handed to inference as one unit.
///
/// Samples are 32-bit float, 16kHz mono, immutable once emitted by the
/// assembler. The sequence number preserves emission order; callers that
/// need in-order transcripts reassemble by it, since chunks dispatched to
/// distinct workers may complete out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Emission sequence number, starting at 0 per session.
    pub sequence: u64,
    /// Audio samples as f32 PCM at 16kHz mono.
    pub samples: Vec<f32>,
}

impl AudioChunk {
    /// Creates a new audio chunk.
    pub fn new(sequence: u64, samples: Vec<f32>) -> Self {
        Self { sequence, samples }
    }

    /// Returns the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / defaults::SAMPLE_RATE as u64
    }

    /// Root-mean-square energy of the chunk, 0.0 for an empty chunk.
    ///
    /// Used to skip silent chunks before paying for inference.
    pub fn rms_energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// One timed span of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    /// Start time in milliseconds, relative to the chunk.
    pub start_ms: u64,
    /// End time in milliseconds, relative to the chunk.
    pub end_ms: u64,
    /// Transcribed text.
    pub text: String,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f32,
    /// Speaker ID when diarization is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

/// Complete transcription result for one chunk.
///
/// Segment start/end times are monotonically non-decreasing and bounded
/// by `[0, duration_ms]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Ordered transcription segments.
    pub segments: Vec<TranscriptionSegment>,
    /// Total audio duration in milliseconds.
    pub duration_ms: u64,
    /// Language detected or forced.
    pub language: String,
    /// Name of the model that produced this result.
    pub model: String,
}

impl TranscriptionResult {
    /// Concatenated text of all segments.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns true if every segment satisfies `0 <= start <= end <= duration`
    /// and starts are non-decreasing.
    pub fn segments_in_bounds(&self) -> bool {
        let mut prev_start = 0u64;
        self.segments.iter().all(|s| {
            let ok = s.start_ms <= s.end_ms && s.end_ms <= self.duration_ms && s.start_ms >= prev_start;
            prev_start = s.start_ms;
            ok
        })
    }
}
