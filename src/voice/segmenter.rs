//! Voice activity segmentation
//!
//! Turns the raw chunk stream into speech-start / speech-end events. Silence
//! chunks are kept in a short lookback ring so the first syllables lost to
//! classifier latency are recovered when speech begins.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::VoiceConfig;
use crate::voice::chunk::{AudioChunk, VadDecision};
use crate::voice::snapshot::SpeechSnapshotBuffer;
use crate::voice::vad::VoiceActivityClassifier;

/// Identifier of one user speech turn, assigned at speech start
pub type TurnId = u64;

/// A sealed utterance: lookback chunks followed by every chunk up to speech end
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    turn: TurnId,
    chunks: Vec<AudioChunk>,
    lookback_len: usize,
}

impl SpeechSegment {
    /// Build a segment directly, mainly for tests and replay
    #[must_use]
    pub const fn new(turn: TurnId, chunks: Vec<AudioChunk>, lookback_len: usize) -> Self {
        Self {
            turn,
            chunks,
            lookback_len,
        }
    }

    /// Turn this segment belongs to
    #[must_use]
    pub const fn turn(&self) -> TurnId {
        self.turn
    }

    /// Chunks in sequence order
    #[must_use]
    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    /// How many leading chunks came from the lookback ring
    #[must_use]
    pub const fn lookback_len(&self) -> usize {
        self.lookback_len
    }

    /// Total number of samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(AudioChunk::len).sum()
    }

    /// Concatenated samples
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk.samples());
        }
        out
    }

    /// Audio duration at the given sample rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.sample_count() as f32 / sample_rate as f32
    }
}

/// Events published by the segmenter
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// Silence turned into speech
    SpeechStart { turn: TurnId },

    /// Sustained silence sealed the current segment
    SpeechEnd { segment: SpeechSegment },
}

/// Segmenter VAD state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Silence,
    Speech,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmenterStats {
    pub chunks_seen: u64,
    pub chunks_rejected: u64,
    pub classifier_errors: u64,
    pub segments_opened: u64,
    pub segments_sealed: u64,
}

/// Bounded ring of the most recent silence chunks, oldest evicted first
#[derive(Debug)]
struct RingLookback {
    chunks: VecDeque<AudioChunk>,
    capacity: usize,
}

impl RingLookback {
    fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, chunk: AudioChunk) {
        if self.capacity == 0 {
            return;
        }
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    fn take(&mut self) -> Vec<AudioChunk> {
        self.chunks.drain(..).collect()
    }

    fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// Segment being accumulated while in speech
#[derive(Debug)]
struct OpenSegment {
    turn: TurnId,
    chunks: Vec<AudioChunk>,
    lookback_len: usize,
    silent_chunks: u32,
}

/// Splits a chunk stream into speech segments
///
/// Single writer: the lookback ring and the open segment are only touched by
/// the task driving [`process`](Self::process).
pub struct VoiceActivitySegmenter<C> {
    classifier: C,
    lookback: RingLookback,
    current: Option<OpenSegment>,
    chunk_ms: u32,
    silence_ms: u32,
    snapshot: Option<SpeechSnapshotBuffer>,
    events: mpsc::UnboundedSender<SegmenterEvent>,
    next_turn: TurnId,
    last_seq: Option<u64>,
    stats: SegmenterStats,
}

impl<C: VoiceActivityClassifier> VoiceActivitySegmenter<C> {
    /// Create a segmenter publishing onto `events`
    #[must_use]
    pub fn new(
        classifier: C,
        config: &VoiceConfig,
        events: mpsc::UnboundedSender<SegmenterEvent>,
    ) -> Self {
        Self {
            classifier,
            lookback: RingLookback::new(config.lookback_chunks),
            current: None,
            chunk_ms: config.chunk_ms,
            silence_ms: config.silence_ms,
            snapshot: None,
            events,
            next_turn: 1,
            last_seq: None,
            stats: SegmenterStats::default(),
        }
    }

    /// Record every accepted chunk into a snapshot buffer
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SpeechSnapshotBuffer) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Current VAD state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        if self.current.is_some() {
            SegmenterState::Speech
        } else {
            SegmenterState::Silence
        }
    }

    /// Counters so far
    #[must_use]
    pub const fn stats(&self) -> SegmenterStats {
        self.stats
    }

    /// Feed one chunk
    pub fn process(&mut self, chunk: AudioChunk) {
        if let Some(last) = self.last_seq
            && chunk.seq() <= last
        {
            self.stats.chunks_rejected += 1;
            tracing::warn!(seq = chunk.seq(), last, "out-of-order chunk dropped");
            return;
        }
        self.last_seq = Some(chunk.seq());
        self.stats.chunks_seen += 1;

        if let Some(snapshot) = &self.snapshot {
            snapshot.record(&chunk);
        }

        let decision = self.classifier.classify(&chunk).unwrap_or_else(|e| {
            self.stats.classifier_errors += 1;
            tracing::warn!(seq = chunk.seq(), error = %e, "vad failed, treating chunk as silence");
            VadDecision::silence()
        });

        match self.current.as_mut() {
            None if decision.is_speech => self.open(chunk),
            None => self.lookback.push(chunk),
            Some(open) => {
                open.chunks.push(chunk);
                if decision.is_speech {
                    open.silent_chunks = 0;
                } else {
                    open.silent_chunks += 1;
                    if open.silent_chunks.saturating_mul(self.chunk_ms) >= self.silence_ms {
                        self.seal();
                    }
                }
            }
        }
    }

    fn open(&mut self, chunk: AudioChunk) {
        let turn = self.next_turn;
        self.next_turn += 1;

        let mut chunks = self.lookback.take();
        let lookback_len = chunks.len();
        chunks.push(chunk);

        self.current = Some(OpenSegment {
            turn,
            chunks,
            lookback_len,
            silent_chunks: 0,
        });
        self.stats.segments_opened += 1;

        tracing::debug!(turn, lookback = lookback_len, "speech start");
        self.publish(SegmenterEvent::SpeechStart { turn });
    }

    fn seal(&mut self) {
        let Some(open) = self.current.take() else {
            return;
        };
        self.lookback.clear();
        self.stats.segments_sealed += 1;

        let segment = SpeechSegment::new(open.turn, open.chunks, open.lookback_len);
        tracing::debug!(
            turn = segment.turn(),
            chunks = segment.chunks().len(),
            samples = segment.sample_count(),
            "speech end"
        );
        self.publish(SegmenterEvent::SpeechEnd { segment });
    }

    fn publish(&self, event: SegmenterEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("segmenter event receiver dropped");
        }
    }

    /// Drive the segmenter until the chunk stream ends or `cancel` fires
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<AudioChunk>,
        cancel: CancellationToken,
    ) -> SegmenterStats {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => self.process(chunk),
                    None => break,
                },
            }
        }

        tracing::debug!(
            chunks = self.stats.chunks_seen,
            segments = self.stats.segments_sealed,
            "segmenter stopped"
        );
        self.stats
    }
}
