//! Audio chunk and VAD decision types

use std::sync::Arc;

/// A fixed-duration block of mono samples with a monotonic sequence index
///
/// Samples are shared behind an `Arc` so the segmenter, the lookback ring and
/// the snapshot buffer can hold the same chunk without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    seq: u64,
    samples: Arc<[f32]>,
}

impl AudioChunk {
    /// Create a chunk from its sequence index and samples
    #[must_use]
    pub fn new(seq: u64, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            seq,
            samples: samples.into(),
        }
    }

    /// Sequence index assigned by the producer
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Mono samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-chunk speech/silence classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    /// Whether the chunk is classified as speech
    pub is_speech: bool,

    /// Classifier confidence in `[0.0, 1.0]`
    pub confidence: f32,
}

impl VadDecision {
    /// Derive a decision from a confidence and a threshold
    #[must_use]
    pub fn from_confidence(confidence: f32, threshold: f32) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            is_speech: confidence > threshold,
            confidence,
        }
    }

    /// A silence decision with zero confidence
    #[must_use]
    pub const fn silence() -> Self {
        Self {
            is_speech: false,
            confidence: 0.0,
        }
    }
}

/// Splits a continuous sample stream into fixed-size sequenced chunks
///
/// Partial input is held until a full chunk is available.
#[derive(Debug)]
pub struct Chunker {
    chunk_samples: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl Chunker {
    /// Create a chunker emitting chunks of `chunk_samples` samples
    #[must_use]
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunk_samples: chunk_samples.max(1),
            pending: Vec::with_capacity(chunk_samples),
            next_seq: 0,
        }
    }

    /// Push samples and return every chunk that became complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
            out.push(AudioChunk::new(self.next_seq, chunk));
            self.next_seq += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_threshold_is_exclusive() {
        assert!(!VadDecision::from_confidence(0.55, 0.55).is_speech);
        assert!(VadDecision::from_confidence(0.56, 0.55).is_speech);
    }

    #[test]
    fn test_decision_clamps_confidence() {
        let d = VadDecision::from_confidence(3.0, 0.5);
        assert!((d.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_chunker_holds_partial_input() {
        let mut chunker = Chunker::new(4);
        assert!(chunker.push(&[0.1; 3]).is_empty());

        let chunks = chunker.push(&[0.2; 6]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq(), 0);
        assert_eq!(chunks[1].seq(), 1);
        assert_eq!(chunks[0].samples(), &[0.1, 0.1, 0.1, 0.2]);

        // one sample left over
        let chunks = chunker.push(&[0.3; 3]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq(), 2);
    }
}
