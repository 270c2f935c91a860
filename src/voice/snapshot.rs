//! Rolling window of recently captured audio
//!
//! Records every chunk regardless of VAD state so the interrupt arbiter can
//! take a snapshot mid-speech without touching the segmenter's state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::voice::chunk::AudioChunk;

/// A bounded, continuously overwritten view of the last T seconds of audio
///
/// Cloning yields another handle to the same window.
#[derive(Debug, Clone)]
pub struct SpeechSnapshotBuffer {
    window: Arc<Mutex<Window>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Window {
    chunks: VecDeque<AudioChunk>,
    samples: usize,
}

impl SpeechSnapshotBuffer {
    /// Create a window holding at most `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window::default())),
            capacity,
        }
    }

    /// Window capacity in samples
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a chunk, evicting the oldest chunks that fall outside the window
    pub fn record(&self, chunk: &AudioChunk) {
        if let Ok(mut w) = self.window.lock() {
            w.samples += chunk.len();
            w.chunks.push_back(chunk.clone());

            // Keep whole chunks as long as the newest `capacity` samples stay covered
            while let Some(front) = w.chunks.front() {
                if w.samples - front.len() < self.capacity {
                    break;
                }
                w.samples -= front.len();
                w.chunks.pop_front();
            }
        }
    }

    /// Copy of the most recent `capacity` samples, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.snapshot_last(self.capacity)
    }

    /// Copy of the most recent `samples` samples, oldest first
    ///
    /// Returns a shorter buffer when less audio has been recorded.
    #[must_use]
    pub fn snapshot_last(&self, samples: usize) -> Vec<f32> {
        // Clone the chunk handles under the lock and copy samples outside it
        let chunks: Vec<AudioChunk> = self
            .window
            .lock()
            .map(|w| w.chunks.iter().cloned().collect())
            .unwrap_or_default();

        let total: usize = chunks.iter().map(AudioChunk::len).sum();
        let want = samples.min(self.capacity).min(total);
        let mut skip = total - want;

        let mut out = Vec::with_capacity(want);
        for chunk in &chunks {
            let s = chunk.samples();
            if skip >= s.len() {
                skip -= s.len();
                continue;
            }
            out.extend_from_slice(&s[skip..]);
            skip = 0;
        }
        out
    }

    /// Number of samples currently available to a snapshot
    #[must_use]
    pub fn available(&self) -> usize {
        self.window
            .lock()
            .map(|w| w.samples.min(self.capacity))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn chunk(seq: u64, len: usize) -> AudioChunk {
        AudioChunk::new(seq, vec![seq as f32; len])
    }

    #[test]
    fn test_snapshot_is_best_effort_before_full() {
        let buf = SpeechSnapshotBuffer::new(10);
        buf.record(&chunk(1, 4));
        assert_eq!(buf.snapshot(), vec![1.0; 4]);
        assert_eq!(buf.available(), 4);
    }

    #[test]
    fn test_snapshot_keeps_newest_samples() {
        let buf = SpeechSnapshotBuffer::new(6);
        for seq in 0..5 {
            buf.record(&chunk(seq, 4));
        }

        // last 6 samples: two from chunk 3, four from chunk 4
        assert_eq!(buf.snapshot(), vec![3.0, 3.0, 4.0, 4.0, 4.0, 4.0]);
        assert_eq!(buf.available(), 6);
    }

    #[test]
    fn test_snapshot_last_clamps_to_capacity() {
        let buf = SpeechSnapshotBuffer::new(4);
        buf.record(&chunk(7, 8));
        assert_eq!(buf.snapshot_last(100).len(), 4);
        assert_eq!(buf.snapshot_last(2), vec![7.0, 7.0]);
    }

    #[test]
    fn test_snapshot_does_not_mutate_window() {
        let buf = SpeechSnapshotBuffer::new(8);
        buf.record(&chunk(1, 8));
        let a = buf.snapshot();
        let b = buf.snapshot();
        assert_eq!(a, b);
    }

    #[test]
    fn test_clones_share_the_window() {
        let writer = SpeechSnapshotBuffer::new(8);
        let reader = writer.clone();
        writer.record(&chunk(2, 3));
        assert_eq!(reader.snapshot(), vec![2.0; 3]);
    }
}
