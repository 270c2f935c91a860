//! Configuration management for the duet voice agent

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default system prompt for the conversational engine
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant on a phone call with the user. \
You work together with a computer agent that operates a browser on the user's behalf. \
Your main goal is to help the user fill in an online form.\n\
- Keep replies short and conversational.\n\
- When the user gives you information the form needs (for example a name or an ID number), \
call the `send_message_to_computer_agent` tool to pass it on.\n\
- Messages from the computer agent start with `[FROM_COMPUTER_AGENT]`. Fold their content \
naturally into the conversation, e.g. confirm what was filled in and ask the next question.";

/// Default prompt template for the interrupt classifier; `{text}` is replaced
/// with the snapshot transcript
pub const DEFAULT_INTERRUPT_PROMPT: &str = "You are a precise, literal-minded classification expert. \
Your only task is to decide whether the user's speech is a simple filler phrase or carries substance.\n\n\
- Substantive content (`interrupt`): any statement that gives new information, asks a question, \
makes a correction or expresses a thought. Examples: \"my name is Alex\", \"the ID is 123456\", \
\"next is my phone number\", \"wait, I said that wrong\", \"what's your name?\"\n\
- Simple filler (`disinterrupt`): only short agreements or acknowledgements. \
Examples: \"okay\", \"mm-hmm\", \"yes\", \"right\", \"sure\", \"okay okay\"\n\n\
Respond with a single word: `interrupt` or `disinterrupt`.\n\n\
User's transcribed text: \"{text}\"\nYour decision:";

/// Default greeting injected as the first user turn
pub const DEFAULT_GREETING: &str =
    "Hello, please introduce yourself and explain the task we are working on.";

/// Duet configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Capture, VAD and interrupt timing
    pub voice: VoiceConfig,

    /// Large conversational model
    pub llm: LlmConfig,

    /// Small local interrupt classifier
    pub classifier: ClassifierConfig,

    /// Speech-to-text / text-to-speech
    pub speech: SpeechConfig,

    /// Operating agent link
    pub peer: PeerConfig,

    /// Dispatch loop behavior
    pub dispatch: DispatchConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Voice capture and segmentation configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Duration of one audio chunk in milliseconds
    pub chunk_ms: u32,

    /// Voice activity model
    pub vad_backend: VadBackend,

    /// WebRTC VAD aggressiveness, 0 (least) to 3 (most)
    pub vad_aggressiveness: u8,

    /// VAD confidence threshold (speech when confidence > threshold)
    pub vad_threshold: f32,

    /// Capacity of the silence lookback ring, in chunks
    pub lookback_chunks: usize,

    /// Sustained silence that seals a speech segment (inclusive)
    pub silence_ms: u32,

    /// Segments with less audio than this are discarded
    pub min_speech_ms: u32,

    /// Delay between speech start and the fast interrupt snapshot
    pub fast_check: Duration,

    /// Snapshots with fewer samples are treated as no interrupt
    pub min_snapshot_samples: usize,

    /// Length of the rolling snapshot window
    pub snapshot_window: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let chunk_ms = 32;
        let lookback_chunks = 5;
        let fast_check = Duration::from_millis(1600);
        Self {
            sample_rate: 16_000,
            chunk_ms,
            vad_backend: VadBackend::default(),
            vad_aggressiveness: 2,
            vad_threshold: 0.55,
            lookback_chunks,
            silence_ms: 800,
            min_speech_ms: 250,
            fast_check,
            min_snapshot_samples: 1024,
            snapshot_window: fast_check
                + Duration::from_millis(u64::from(chunk_ms) * lookback_chunks as u64),
        }
    }
}

/// Voice activity classifier selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    /// WebRTC GMM voice detector; confidence is the voiced share of 10 ms frames
    #[default]
    WebRtc,
    /// RMS energy detector
    Energy,
}

impl FromStr for VadBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webrtc" => Ok(Self::WebRtc),
            "energy" => Ok(Self::Energy),
            other => Err(Error::Config(format!("unknown VAD backend: {other}"))),
        }
    }
}

impl VoiceConfig {
    /// Number of samples in one chunk
    #[must_use]
    pub const fn chunk_samples(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }

    /// Number of samples in the snapshot window
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn snapshot_samples(&self) -> usize {
        (self.snapshot_window.as_millis() as usize * self.sample_rate as usize) / 1000
    }

    /// Minimum number of samples for a segment to be dispatched
    #[must_use]
    pub const fn min_speech_samples(&self) -> usize {
        (self.min_speech_ms as usize * self.sample_rate as usize) / 1000
    }
}

/// Conversational engine configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// System prompt
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-nano".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Interrupt classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// OpenAI-compatible base URL of the small model server
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// API key (Ollama accepts any value)
    pub api_key: String,

    /// Request timeout
    pub timeout: Duration,

    /// Prompt template containing `{text}`
    pub prompt: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:1.5b".to_string(),
            api_key: "ollama".to_string(),
            timeout: Duration::from_secs(8),
            prompt: DEFAULT_INTERRUPT_PROMPT.to_string(),
        }
    }
}

/// Speech configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// OpenAI-compatible base URL for transcription and synthesis
    pub base_url: String,

    /// STT model
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            stt_model: "gpt-4o-mini-transcribe".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            tts_voice: "alloy".to_string(),
        }
    }
}

/// Operating agent link configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address the peer link listens on
    pub listen_addr: String,

    /// How often the watcher re-checks the busy flag
    pub poll_interval: Duration,

    /// Inbound queue capacity before the oldest message is dropped
    pub inbound_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7878".to_string(),
            poll_interval: Duration::from_millis(500),
            inbound_capacity: 256,
        }
    }
}

/// Dispatch loop configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Speech queue capacity before the oldest segment is dropped
    pub speech_queue_capacity: usize,

    /// Max engine re-invocations after tool calls within one job
    pub max_tool_rounds: usize,

    /// Optional first user turn dispatched at startup
    pub greeting: Option<String>,

    /// Phrases that trigger the redirect guardrail
    pub blocked_phrases: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            speech_queue_capacity: 32,
            max_tool_rounds: 4,
            greeting: Some(DEFAULT_GREETING.to_string()),
            blocked_phrases: Vec::new(),
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for STT, TTS and the conversational engine)
    pub openai: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed config file plus environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_file(fc: file::DuetConfigFile) -> Result<Self> {
        let defaults = VoiceConfig::default();
        let chunk_ms = fc.voice.chunk_ms.unwrap_or(defaults.chunk_ms);
        let lookback_chunks = fc.voice.lookback_chunks.unwrap_or(defaults.lookback_chunks);
        let fast_check = env_parse::<u64>("DUET_FAST_CHECK_MS")
            .or(fc.voice.fast_check_ms)
            .map_or(defaults.fast_check, Duration::from_millis);
        let snapshot_window = fc.voice.snapshot_window_ms.map_or_else(
            || fast_check + Duration::from_millis(u64::from(chunk_ms) * lookback_chunks as u64),
            Duration::from_millis,
        );

        let voice = VoiceConfig {
            sample_rate: defaults.sample_rate,
            chunk_ms,
            vad_backend: env_parse::<VadBackend>("DUET_VAD_BACKEND")
                .or(fc.voice.vad_backend)
                .unwrap_or(defaults.vad_backend),
            vad_aggressiveness: fc
                .voice
                .vad_aggressiveness
                .unwrap_or(defaults.vad_aggressiveness),
            vad_threshold: env_parse::<f32>("DUET_VAD_THRESHOLD")
                .or(fc.voice.vad_threshold)
                .unwrap_or(defaults.vad_threshold),
            lookback_chunks,
            silence_ms: env_parse::<u32>("DUET_SILENCE_MS")
                .or(fc.voice.silence_ms)
                .unwrap_or(defaults.silence_ms),
            min_speech_ms: fc.voice.min_speech_ms.unwrap_or(defaults.min_speech_ms),
            fast_check,
            min_snapshot_samples: defaults.min_snapshot_samples,
            snapshot_window,
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            base_url: std::env::var("DUET_LLM_BASE_URL")
                .ok()
                .or(fc.llm.base_url)
                .unwrap_or(llm_defaults.base_url),
            model: std::env::var("DUET_LLM_MODEL")
                .ok()
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
            system_prompt: fc.llm.system_prompt.unwrap_or(llm_defaults.system_prompt),
        };

        let cls_defaults = ClassifierConfig::default();
        let classifier = ClassifierConfig {
            base_url: std::env::var("DUET_CLASSIFIER_URL")
                .ok()
                .or(fc.classifier.base_url)
                .unwrap_or(cls_defaults.base_url),
            model: std::env::var("DUET_CLASSIFIER_MODEL")
                .ok()
                .or(fc.classifier.model)
                .unwrap_or(cls_defaults.model),
            api_key: fc.classifier.api_key.unwrap_or(cls_defaults.api_key),
            timeout: fc
                .classifier
                .timeout_ms
                .map_or(cls_defaults.timeout, Duration::from_millis),
            prompt: cls_defaults.prompt,
        };

        let speech_defaults = SpeechConfig::default();
        let speech = SpeechConfig {
            base_url: fc.speech.base_url.unwrap_or(speech_defaults.base_url),
            stt_model: std::env::var("DUET_STT_MODEL")
                .ok()
                .or(fc.speech.stt_model)
                .unwrap_or(speech_defaults.stt_model),
            tts_model: std::env::var("DUET_TTS_MODEL")
                .ok()
                .or(fc.speech.tts_model)
                .unwrap_or(speech_defaults.tts_model),
            tts_voice: fc.speech.tts_voice.unwrap_or(speech_defaults.tts_voice),
        };

        let peer_defaults = PeerConfig::default();
        let peer = PeerConfig {
            listen_addr: std::env::var("DUET_PEER_ADDR")
                .ok()
                .or(fc.peer.listen_addr)
                .unwrap_or(peer_defaults.listen_addr),
            poll_interval: fc
                .peer
                .poll_interval_ms
                .map_or(peer_defaults.poll_interval, Duration::from_millis),
            inbound_capacity: fc
                .peer
                .inbound_capacity
                .unwrap_or(peer_defaults.inbound_capacity),
        };

        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            speech_queue_capacity: fc
                .dispatch
                .speech_queue_capacity
                .unwrap_or(dispatch_defaults.speech_queue_capacity),
            max_tool_rounds: fc
                .dispatch
                .max_tool_rounds
                .unwrap_or(dispatch_defaults.max_tool_rounds),
            greeting: match fc.dispatch.greeting {
                Some(g) if g.trim().is_empty() => None,
                Some(g) => Some(g),
                None => dispatch_defaults.greeting,
            },
            blocked_phrases: fc.dispatch.blocked_phrases.unwrap_or_default(),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
        };

        let config = Self {
            voice,
            llm,
            classifier,
            speech,
            peer,
            dispatch,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that would otherwise break segmentation
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.voice.chunk_samples() == 0 {
            return Err(Error::Config("voice.chunk_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.voice.vad_threshold) {
            return Err(Error::Config(
                "voice.vad_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.voice.vad_aggressiveness > 3 {
            return Err(Error::Config(
                "voice.vad_aggressiveness must be within 0..=3".to_string(),
            ));
        }
        if self.voice.silence_ms == 0 {
            return Err(Error::Config("voice.silence_ms must be positive".to_string()));
        }
        if self.peer.inbound_capacity == 0 || self.dispatch.speech_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be positive".to_string()));
        }
        Ok(())
    }

    /// Return the `OpenAI` API key or a configuration error
    ///
    /// # Errors
    ///
    /// Returns error if `OPENAI_API_KEY` is not set
    pub fn openai_key(&self) -> Result<String> {
        self.api_keys
            .openai
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_geometry() {
        let voice = VoiceConfig::default();
        assert_eq!(voice.chunk_samples(), 512);
        assert_eq!(voice.min_speech_samples(), 4000);
        // 1.6s fast check plus 5 x 32ms lookback
        assert_eq!(voice.snapshot_window, Duration::from_millis(1760));
        assert_eq!(voice.snapshot_samples(), 28_160);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.voice.vad_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.voice.chunk_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_greeting_disables_it() {
        let mut fc = file::DuetConfigFile::default();
        fc.dispatch.greeting = Some("   ".to_string());
        let config = Config::from_file(fc).unwrap();
        assert!(config.dispatch.greeting.is_none());
    }

    #[test]
    fn test_file_overlay_applies() {
        let mut fc = file::DuetConfigFile::default();
        fc.voice.lookback_chunks = Some(8);
        fc.peer.inbound_capacity = Some(4);
        let config = Config::from_file(fc).unwrap();
        assert_eq!(config.voice.lookback_chunks, 8);
        assert_eq!(config.peer.inbound_capacity, 4);
    }

    #[test]
    fn test_vad_backend_parses_case_insensitively() {
        assert_eq!("WebRTC".parse::<VadBackend>().unwrap(), VadBackend::WebRtc);
        assert_eq!(" energy ".parse::<VadBackend>().unwrap(), VadBackend::Energy);
        assert!("silero".parse::<VadBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_aggressiveness() {
        let mut config = Config::default();
        config.voice.vad_aggressiveness = 4;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
        };
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("redacted"));
    }
}
