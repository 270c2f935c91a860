//! Interrupt intent classification on the small local model

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Whether a snapshot transcript is a real interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptVerdict {
    /// New information, a question or a correction
    Interrupt,
    /// Filler such as "okay" or "mm-hmm"
    Disinterrupt,
}

impl InterruptVerdict {
    /// Parse a model answer; anything other than `interrupt` is a disinterrupt
    #[must_use]
    pub fn parse(answer: &str) -> Self {
        let word = answer
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
            .to_lowercase();
        if word == "interrupt" {
            Self::Interrupt
        } else {
            Self::Disinterrupt
        }
    }
}

/// Classifies a short transcript into an interrupt verdict
#[async_trait]
pub trait InterruptClassifier: Send + Sync {
    /// Classify the transcript
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails
    async fn classify(&self, text: &str) -> Result<InterruptVerdict>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    model: &'a str,
    messages: [ClassifyMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ClassifyMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    choices: Vec<ClassifyChoice>,
}

#[derive(Deserialize)]
struct ClassifyChoice {
    message: ClassifyReply,
}

#[derive(Deserialize)]
struct ClassifyReply {
    content: Option<String>,
}

/// Prompt-based classifier on an OpenAI-compatible endpoint (e.g. Ollama)
pub struct ChatInterruptClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt: String,
}

impl ChatInterruptClassifier {
    /// Create a classifier; `prompt` must contain `{text}`
    ///
    /// # Errors
    ///
    /// Returns error if the prompt has no `{text}` placeholder or the HTTP
    /// client cannot be built
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        prompt: String,
        timeout: Duration,
    ) -> Result<Self> {
        if !prompt.contains("{text}") {
            return Err(Error::Config(
                "interrupt prompt must contain {text}".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            prompt,
        })
    }
}

#[async_trait]
impl InterruptClassifier for ChatInterruptClassifier {
    async fn classify(&self, text: &str) -> Result<InterruptVerdict> {
        let prompt = self.prompt.replace("{text}", text);
        let request = ClassifyRequest {
            model: &self.model,
            messages: [ClassifyMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: 10,
            temperature: 0.0,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Classifier(format!("classifier error {status}: {body}")));
        }

        let result: ClassifyResponse = response.json().await?;
        let answer = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let verdict = InterruptVerdict::parse(&answer);
        tracing::debug!(text, answer = %answer.trim(), ?verdict, "interrupt classified");
        Ok(verdict)
    }
}
