//! One recording session: audio in, ordered transcription events out.
//!
//! The session owns a `ChunkAssembler` and dispatches emitted chunks to a
//! shared `WorkerPool`. Chunks sent to distinct workers may complete out
//! of order; every event carries the chunk sequence number so consumers
//! can reassemble the transcript.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::audio::recorder::AudioSource;
use crate::defaults;
use crate::error::Result;
use crate::streaming::assembler::{AssemblerConfig, BackpressurePolicy, ChunkAssembler};
use crate::streaming::chunk::{AudioChunk, TranscriptionResult};
use crate::worker::pool::WorkerPool;

/// Per-chunk outcome emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Inference completed for the chunk.
    Transcribed {
        sequence: u64,
        result: TranscriptionResult,
    },
    /// Inference failed for the chunk; later chunks are unaffected.
    Failed { sequence: u64, error: String },
    /// The chunk's RMS energy was below the silence threshold and it was
    /// never sent to inference.
    SkippedSilence { sequence: u64 },
}

/// Streaming transcription session over a shared worker pool.
pub struct StreamingSession {
    assembler: ChunkAssembler,
    policy: BackpressurePolicy,
    pool: Arc<WorkerPool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tasks: JoinSet<()>,
    in_flight: Arc<AtomicUsize>,
    min_energy: f32,
}

impl StreamingSession {
    /// Creates a session and the receiver its events arrive on.
    pub fn new(
        pool: Arc<WorkerPool>,
        config: AssemblerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let policy = config.backpressure;
        let session = Self {
            assembler: ChunkAssembler::with_config(config),
            policy,
            pool,
            events,
            tasks: JoinSet::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            min_energy: defaults::MIN_ENERGY_FOR_TRANSCRIPTION,
        };
        (session, receiver)
    }

    /// Samples discarded so far by the `Drop` backpressure policy.
    pub fn dropped_samples(&self) -> u64 {
        self.assembler.dropped_samples()
    }

    /// Feeds captured samples into the session, dispatching any chunks
    /// that become ready.
    ///
    /// With the `Block` policy inference is awaited inline, so this call
    /// does not return until the emitted chunks are transcribed. With
    /// `Drop` or `Queue` the dispatch runs in the background and this
    /// call returns immediately; the assembler's policy governs samples
    /// arriving meanwhile.
    pub async fn feed(&mut self, samples: &[f32]) -> Result<()> {
        // A finished background dispatch reopens the assembler; queued
        // samples may emit chunks of their own.
        if self.assembler.is_processing() && self.in_flight.load(Ordering::SeqCst) == 0 {
            let drained = self.assembler.set_processing(false);
            for chunk in drained {
                self.dispatch(chunk).await;
            }
        }

        let chunks = self.assembler.append(samples);
        for chunk in chunks {
            self.dispatch(chunk).await;
        }
        Ok(())
    }

    /// Drives a finite source to end of stream, then flushes.
    pub async fn consume(mut self, source: &mut dyn AudioSource) -> Result<()> {
        source.start()?;
        loop {
            let samples = source.read_samples()?;
            if samples.is_empty() {
                break;
            }
            self.feed(&samples).await?;
        }
        source.stop()?;
        self.finish().await
    }

    /// Flushes trailing audio and waits for every dispatch to settle.
    ///
    /// Consumes the session; the event channel closes when the last event
    /// has been sent.
    pub async fn finish(mut self) -> Result<()> {
        while self.tasks.join_next().await.is_some() {}

        let drained = self.assembler.set_processing(false);
        for chunk in drained {
            self.transcribe_now(chunk).await;
        }
        if let Some(chunk) = self.assembler.flush() {
            self.transcribe_now(chunk).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, chunk: AudioChunk) {
        if self.gate_silence(&chunk) {
            return;
        }

        match self.policy {
            BackpressurePolicy::Block => self.transcribe_now(chunk).await,
            BackpressurePolicy::Drop | BackpressurePolicy::Queue => {
                self.assembler.set_processing(true);
                self.in_flight.fetch_add(1, Ordering::SeqCst);

                let pool = self.pool.clone();
                let events = self.events.clone();
                let in_flight = self.in_flight.clone();
                let sequence = chunk.sequence;
                self.tasks.spawn(async move {
                    let event = match pool.transcribe(chunk).await {
                        Ok(result) => SessionEvent::Transcribed { sequence, result },
                        Err(e) => SessionEvent::Failed {
                            sequence,
                            error: e.to_string(),
                        },
                    };
                    // Receiver gone means the consumer stopped listening.
                    events.send(event).ok();
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }

    async fn transcribe_now(&mut self, chunk: AudioChunk) {
        if self.gate_silence(&chunk) {
            return;
        }
        let sequence = chunk.sequence;
        let event = match self.pool.transcribe(chunk).await {
            Ok(result) => SessionEvent::Transcribed { sequence, result },
            Err(e) => SessionEvent::Failed {
                sequence,
                error: e.to_string(),
            },
        };
        self.events.send(event).ok();
    }

    /// Skips chunks too quiet to contain speech. Returns true if gated.
    fn gate_silence(&self, chunk: &AudioChunk) -> bool {
        if chunk.rms_energy() < self.min_energy {
            tracing::debug!(sequence = chunk.sequence, "skipping silent chunk");
            self.events
                .send(SessionEvent::SkippedSilence {
                    sequence: chunk.sequence,
                })
                .ok();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockAudioSource;
    use crate::config::{ModelConfig, PoolConfig};
    use crate::engine::model::MockSpeechModel;
    use std::time::Duration;

    fn pool(latency_ms: u64) -> Arc<WorkerPool> {
        let mut model = MockSpeechModel::new("mock").with_text("hello");
        if latency_ms > 0 {
            model = model.with_latency(Duration::from_millis(latency_ms));
        }
        Arc::new(WorkerPool::new(
            ModelConfig::default(),
            PoolConfig {
                max_workers: 2,
                load_timeout_ms: 5_000,
                process_timeout_ms: 5_000,
            },
            model.into_factory(),
        ))
    }

    fn config(capacity: usize, backpressure: BackpressurePolicy) -> AssemblerConfig {
        AssemblerConfig {
            capacity,
            backpressure,
        }
    }

    #[tokio::test]
    async fn test_full_chunk_produces_event() {
        let (mut session, mut events) =
            StreamingSession::new(pool(0), config(1_000, BackpressurePolicy::Block));

        session.feed(&[0.1; 1_000]).await.unwrap();
        session.finish().await.unwrap();

        match events.recv().await {
            Some(SessionEvent::Transcribed { sequence, result }) => {
                assert_eq!(sequence, 0);
                assert_eq!(result.text(), "hello");
            }
            other => panic!("Expected Transcribed event, got {other:?}"),
        }
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_silent_chunk_is_gated() {
        let (mut session, mut events) =
            StreamingSession::new(pool(0), config(1_000, BackpressurePolicy::Block));

        session.feed(&[0.0; 1_000]).await.unwrap();
        session.finish().await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::SkippedSilence { sequence: 0 })
        );
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_finish_flushes_trailing_audio() {
        let (mut session, mut events) =
            StreamingSession::new(pool(0), config(10_000, BackpressurePolicy::Block));

        session.feed(&[0.1; 1_234]).await.unwrap();
        session.finish().await.unwrap();

        match events.recv().await {
            Some(SessionEvent::Transcribed { sequence, result }) => {
                assert_eq!(sequence, 0);
                // 1234 samples at 16kHz is 77ms
                assert_eq!(result.duration_ms, 77);
            }
            other => panic!("Expected Transcribed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_block_policy_keeps_events_in_order() {
        let (mut session, mut events) =
            StreamingSession::new(pool(0), config(1_000, BackpressurePolicy::Block));

        session.feed(&[0.1; 3_000]).await.unwrap();
        session.finish().await.unwrap();

        for expected in 0..3u64 {
            match events.recv().await {
                Some(SessionEvent::Transcribed { sequence, .. }) => {
                    assert_eq!(sequence, expected);
                }
                other => panic!("Expected Transcribed event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_drop_policy_discards_while_inference_runs() {
        let (mut session, mut events) =
            StreamingSession::new(pool(300), config(1_000, BackpressurePolicy::Drop));

        // Fills the buffer and starts a background dispatch.
        session.feed(&[0.1; 1_000]).await.unwrap();
        // Arrives while inference is still running; the Drop policy
        // discards it.
        session.feed(&[0.2; 500]).await.unwrap();
        assert_eq!(session.dropped_samples(), 500);

        session.finish().await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Transcribed { sequence: 0, .. })
        ));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_policy_transcribes_held_samples() {
        let (mut session, mut events) =
            StreamingSession::new(pool(100), config(1_000, BackpressurePolicy::Queue));

        session.feed(&[0.1; 1_000]).await.unwrap();
        session.feed(&[0.2; 600]).await.unwrap();
        assert_eq!(session.dropped_samples(), 0);

        session.finish().await.unwrap();

        let mut transcribed = 0;
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Transcribed { .. } => transcribed += 1,
                other => panic!("Unexpected event {other:?}"),
            }
        }
        // The full chunk plus the flushed 600 held-back samples.
        assert_eq!(transcribed, 2);
    }

    #[tokio::test]
    async fn test_consume_drives_source_to_completion() {
        let mut source = MockAudioSource::new().with_reads(vec![
            vec![0.1; 800],
            vec![0.1; 800],
            vec![0.1; 500],
        ]);
        let (session, mut events) =
            StreamingSession::new(pool(0), config(1_000, BackpressurePolicy::Block));

        session.consume(&mut source).await.unwrap();

        let mut sequences = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Transcribed { sequence, .. } => sequences.push(sequence),
                other => panic!("Unexpected event {other:?}"),
            }
        }
        // 2100 samples against a 1000 capacity: two overflow flushes while
        // reading, one final flush of the remainder.
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_session() {
        let factory = MockSpeechModel::new("failing").with_failure().into_factory();
        let pool = Arc::new(WorkerPool::new(
            ModelConfig::default(),
            PoolConfig {
                max_workers: 1,
                load_timeout_ms: 5_000,
                process_timeout_ms: 5_000,
            },
            factory,
        ));
        let (mut session, mut events) =
            StreamingSession::new(pool, config(1_000, BackpressurePolicy::Block));

        session.feed(&[0.1; 2_000]).await.unwrap();
        session.finish().await.unwrap();

        for expected in 0..2u64 {
            match events.recv().await {
                Some(SessionEvent::Failed { sequence, error }) => {
                    assert_eq!(sequence, expected);
                    assert!(!error.is_empty());
                }
                other => panic!("Expected Failed event, got {other:?}"),
            }
        }
    }
}
