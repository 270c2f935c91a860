//! Text-to-speech (TTS) processing

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::voice::playback::{AudioPlayback, PlaybackEnd, pcm16_to_f32};
use crate::voice::text::preprocess_sentence;
use crate::{Error, Result};

/// Speaks text aloud and can be cut off mid-sentence
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak one sentence, returning once playback ends or is stopped
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Halt the current playback immediately
    fn stop(&self);
}

/// Synthesizer backed by an OpenAI-compatible `/audio/speech` endpoint
///
/// Requests raw 24kHz 16-bit PCM so playback can start without decoding.
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    playback: Arc<AudioPlayback>,
    stop: Arc<AtomicBool>,
}

impl OpenAiSynthesizer {
    /// Create a new synthesizer playing through `playback`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        voice: String,
        playback: AudioPlayback,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            voice,
            playback: Arc::new(playback),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Fetch raw PCM audio for `text`
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        let spoken = preprocess_sentence(text);
        if spoken.is_empty() {
            return Ok(());
        }

        self.stop.store(false, Ordering::Release);
        tracing::debug!(text = %spoken, "speaking");

        let pcm = self.synthesize(&spoken).await?;
        if self.stop.load(Ordering::Acquire) {
            return Ok(());
        }

        let samples = pcm16_to_f32(&pcm);
        let playback = Arc::clone(&self.playback);
        let stop = Arc::clone(&self.stop);

        let end = tokio::task::spawn_blocking(move || playback.play_blocking(samples, &stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))??;

        if end == PlaybackEnd::Stopped {
            tracing::debug!("speech stopped");
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
