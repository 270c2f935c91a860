//! Voice processing module
//!
//! Handles audio capture, voice activity segmentation, the rolling snapshot
//! window, STT, TTS and playback.

mod capture;
mod chunk;
mod playback;
mod segmenter;
mod snapshot;
mod stt;
pub mod text;
mod tts;
mod vad;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use chunk::{AudioChunk, Chunker, VadDecision};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, PlaybackEnd, pcm16_to_f32, sine_tone};
pub use segmenter::{
    SegmenterEvent, SegmenterState, SegmenterStats, SpeechSegment, TurnId,
    VoiceActivitySegmenter,
};
pub use snapshot::SpeechSnapshotBuffer;
pub use stt::{OpenAiTranscriber, Transcriber};
pub use tts::{OpenAiSynthesizer, Synthesizer};
pub use vad::{
    EnergyClassifier, VoiceActivityClassifier, WebRtcClassifier, build_classifier,
    calculate_energy,
};
