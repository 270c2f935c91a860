//! Voice activity classification
//!
//! The segmenter only depends on [`VoiceActivityClassifier`]. Two
//! implementations ship: the WebRTC GMM detector and a local RMS energy
//! detector used as the fallback.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::config::{VadBackend, VoiceConfig};
use crate::voice::chunk::{AudioChunk, VadDecision};
use crate::{Error, Result};

/// RMS energy that maps to a confidence of 0.5
const REFERENCE_ENERGY: f32 = 0.03;

/// WebRTC frames are 10 ms
const WEBRTC_FRAMES_PER_SEC: u32 = 100;

/// Classifies a single chunk as speech or silence
///
/// Must complete well under one chunk duration to avoid backlog.
pub trait VoiceActivityClassifier: Send {
    /// Classify one chunk
    ///
    /// # Errors
    ///
    /// Returns error if the underlying model fails
    fn classify(&mut self, chunk: &AudioChunk) -> Result<VadDecision>;
}

impl<C: VoiceActivityClassifier + ?Sized> VoiceActivityClassifier for Box<C> {
    fn classify(&mut self, chunk: &AudioChunk) -> Result<VadDecision> {
        (**self).classify(chunk)
    }
}

/// Build the classifier selected by `config`
///
/// Falls back to [`EnergyClassifier`] when the WebRTC detector cannot run at
/// the configured sample rate.
#[must_use]
pub fn build_classifier(config: &VoiceConfig) -> Box<dyn VoiceActivityClassifier> {
    match config.vad_backend {
        VadBackend::WebRtc => match WebRtcClassifier::new(
            config.sample_rate,
            config.vad_aggressiveness,
            config.vad_threshold,
        ) {
            Ok(vad) => {
                tracing::debug!(
                    sample_rate = config.sample_rate,
                    aggressiveness = config.vad_aggressiveness,
                    "webrtc VAD ready"
                );
                Box::new(vad)
            }
            Err(e) => {
                tracing::warn!(error = %e, "webrtc VAD unavailable, using energy detector");
                Box::new(EnergyClassifier::new(config.vad_threshold))
            }
        },
        VadBackend::Energy => Box::new(EnergyClassifier::new(config.vad_threshold)),
    }
}

/// WebRTC voice activity classifier
///
/// Each chunk is cut into 10 ms frames and the confidence is the share of
/// frames the detector marks as voiced. The detector keeps adaptive noise
/// state, so it lives on its own thread and sees every chunk in order.
pub struct WebRtcClassifier {
    threshold: f32,
    requests: Option<mpsc::Sender<Vec<i16>>>,
    replies: mpsc::Receiver<Option<(usize, usize)>>,
    worker: Option<JoinHandle<()>>,
}

impl WebRtcClassifier {
    /// Start a detector for `sample_rate` (8, 16, 32 or 48 kHz)
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate or aggressiveness is unsupported, or
    /// the worker thread cannot be spawned
    pub fn new(sample_rate: u32, aggressiveness: u8, threshold: f32) -> Result<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => {
                return Err(Error::Vad(format!(
                    "webrtc VAD supports 8, 16, 32 or 48 kHz, got {other} Hz"
                )));
            }
        };
        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(Error::Vad(format!(
                    "webrtc VAD aggressiveness must be 0..=3, got {other}"
                )));
            }
        };
        let frame_len = (sample_rate / WEBRTC_FRAMES_PER_SEC) as usize;

        let (request_tx, request_rx) = mpsc::channel::<Vec<i16>>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("duet-vad".to_string())
            .spawn(move || {
                let mut vad = Vad::new();
                vad.set_mode(mode);
                vad.set_sample_rate(rate);

                for pcm in request_rx {
                    let reply = count_voiced(&mut vad, &pcm, frame_len);
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            threshold,
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
        })
    }
}

/// Voiced and total frame counts, or `None` if the detector rejected a frame
fn count_voiced(vad: &mut Vad, pcm: &[i16], frame_len: usize) -> Option<(usize, usize)> {
    let mut voiced = 0;
    let mut frames = 0;
    for frame in pcm.chunks_exact(frame_len) {
        if vad.is_voice_segment(frame).ok()? {
            voiced += 1;
        }
        frames += 1;
    }
    Some((voiced, frames))
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect()
}

impl VoiceActivityClassifier for WebRtcClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn classify(&mut self, chunk: &AudioChunk) -> Result<VadDecision> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::Vad("webrtc VAD worker stopped".to_string()))?;
        requests
            .send(to_pcm16(chunk.samples()))
            .map_err(|_| Error::Vad("webrtc VAD worker stopped".to_string()))?;

        let (voiced, frames) = self
            .replies
            .recv()
            .map_err(|_| Error::Vad("webrtc VAD worker stopped".to_string()))?
            .ok_or_else(|| Error::Vad("webrtc VAD rejected frame".to_string()))?;

        if frames == 0 {
            return Ok(VadDecision::silence());
        }
        Ok(VadDecision::from_confidence(
            voiced as f32 / frames as f32,
            self.threshold,
        ))
    }
}

impl Drop for WebRtcClassifier {
    fn drop(&mut self) {
        // closing the request channel ends the worker loop
        self.requests.take();
        if self.worker.take().is_some_and(|w| w.join().is_err()) {
            tracing::warn!("webrtc VAD worker panicked");
        }
    }
}

/// Energy-based voice activity classifier
///
/// Confidence rises linearly with RMS energy and saturates at twice the
/// reference energy.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// Create a classifier with the given confidence threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Confidence for a block of samples
    #[must_use]
    pub fn confidence(samples: &[f32]) -> f32 {
        (calculate_energy(samples) / (2.0 * REFERENCE_ENERGY)).min(1.0)
    }
}

impl VoiceActivityClassifier for EnergyClassifier {
    fn classify(&mut self, chunk: &AudioChunk) -> Result<VadDecision> {
        let confidence = Self::confidence(chunk.samples());
        Ok(VadDecision::from_confidence(confidence, self.threshold))
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
