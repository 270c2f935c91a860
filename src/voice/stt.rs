//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::voice::capture::samples_to_wav;
use crate::{Error, Result};

/// Transcribes mono f32 audio to text
///
/// Call sites treat an error as an empty transcript.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the given samples
    ///
    /// # Errors
    ///
    /// Returns error if the transcription backend fails
    async fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// Response from the `OpenAI` transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcriber backed by an OpenAI-compatible `/audio/transcriptions` endpoint
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    sample_rate: u32,
}

impl OpenAiTranscriber {
    /// Create a new transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, base_url: String, model: String, sample_rate: u32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            sample_rate,
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let wav = samples_to_wav(samples, self.sample_rate)?;
        tracing::debug!(audio_bytes = wav.len(), model = %self.model, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        let text = result.text.trim().to_string();

        tracing::debug!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_rejected() {
        let result = OpenAiTranscriber::new(
            String::new(),
            "https://api.openai.com/v1".to_string(),
            "gpt-4o-mini-transcribe".to_string(),
            16_000,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_audio_skips_request() {
        let stt = OpenAiTranscriber::new(
            "sk-test".to_string(),
            "http://127.0.0.1:9/v1/".to_string(),
            "m".to_string(),
            16_000,
        )
        .unwrap();

        assert_eq!(stt.base_url, "http://127.0.0.1:9/v1");
        assert_eq!(stt.transcribe(&[]).await.unwrap(), "");
    }
}
