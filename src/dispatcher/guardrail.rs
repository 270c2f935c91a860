//! Input guardrails run before a job reaches the engine

/// Spoken when a phrase guardrail redirects the user
pub const DEFAULT_REDIRECT: &str = "Let's stay focused on the current task.";

/// What to do with a job's text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailDecision {
    /// Pass to the engine
    Allow,
    /// Drop silently, with a reason for the log
    Reject(String),
    /// Skip the engine and speak this reply instead
    Redirect(String),
}

/// A pluggable predicate over job text
pub trait InputGuardrail: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Inspect the resolved job text
    fn check(&self, text: &str) -> GuardrailDecision;
}

/// Rejects blank input, such as a failed or silent transcription
#[derive(Debug, Default)]
pub struct EmptyTranscriptGuardrail;

impl InputGuardrail for EmptyTranscriptGuardrail {
    fn name(&self) -> &'static str {
        "empty_transcript"
    }

    fn check(&self, text: &str) -> GuardrailDecision {
        if text.trim().is_empty() {
            GuardrailDecision::Reject("empty transcript".to_string())
        } else {
            GuardrailDecision::Allow
        }
    }
}

/// Redirects input containing any configured phrase (case-insensitive)
#[derive(Debug)]
pub struct PhraseGuardrail {
    phrases: Vec<String>,
    reply: String,
}

impl PhraseGuardrail {
    /// Create a guardrail with the default redirect reply
    #[must_use]
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            reply: DEFAULT_REDIRECT.to_string(),
        }
    }

    /// Override the spoken reply
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// Whether any phrase is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl InputGuardrail for PhraseGuardrail {
    fn name(&self) -> &'static str {
        "phrase"
    }

    fn check(&self, text: &str) -> GuardrailDecision {
        let lower = text.to_lowercase();
        if self.phrases.iter().any(|p| lower.contains(p.as_str())) {
            GuardrailDecision::Redirect(self.reply.clone())
        } else {
            GuardrailDecision::Allow
        }
    }
}
