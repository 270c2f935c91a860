//! TOML configuration file loading
//!
//! Supports `~/.config/duet/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::VadBackend;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DuetConfigFile {
    /// Microphone, VAD and interrupt timing
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Large conversational model
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Small local interrupt classifier
    #[serde(default)]
    pub classifier: ClassifierFileConfig,

    /// Speech-to-text and text-to-speech
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Link to the operating agent
    #[serde(default)]
    pub peer: PeerFileConfig,

    /// Dispatch loop behavior
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice capture and segmentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    pub chunk_ms: Option<u32>,

    /// "webrtc" or "energy"
    pub vad_backend: Option<VadBackend>,
    pub vad_aggressiveness: Option<u8>,
    pub vad_threshold: Option<f32>,
    pub lookback_chunks: Option<usize>,
    pub silence_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,

    /// Delay between speech start and the interrupt snapshot
    pub fast_check_ms: Option<u64>,

    /// Rolling snapshot window length
    pub snapshot_window_ms: Option<u64>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4.1-nano")
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,
}

/// Interrupt classifier configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClassifierFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// STT model (e.g. "gpt-4o-mini-transcribe")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "gpt-4o-mini-tts")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,
}

/// Peer link configuration
#[derive(Debug, Default, Deserialize)]
pub struct PeerFileConfig {
    pub listen_addr: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub inbound_capacity: Option<usize>,
}

/// Dispatch configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    pub speech_queue_capacity: Option<usize>,
    pub max_tool_rounds: Option<usize>,
    pub greeting: Option<String>,
    pub blocked_phrases: Option<Vec<String>>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `DuetConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> DuetConfigFile {
    let Some(path) = config_file_path() else {
        return DuetConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_config_file_from(path: &Path) -> DuetConfigFile {
    if !path.exists() {
        return DuetConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                DuetConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            DuetConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/duet/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("duet").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_overlay_parses() {
        let fc: DuetConfigFile = toml::from_str(
            r#"
            [voice]
            silence_ms = 600
            fast_check_ms = 1200
            vad_backend = "energy"

            [dispatch]
            blocked_phrases = ["write me a poem"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.voice.silence_ms, Some(600));
        assert_eq!(fc.voice.fast_check_ms, Some(1200));
        assert_eq!(fc.voice.vad_backend, Some(VadBackend::Energy));
        assert!(fc.voice.chunk_ms.is_none());
        assert!(fc.llm.model.is_none());
        assert_eq!(
            fc.dispatch.blocked_phrases.as_deref(),
            Some(&["write me a poem".to_string()][..])
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let fc = load_config_file_from(Path::new("/definitely/not/here/config.toml"));
        assert!(fc.voice.silence_ms.is_none());
        assert!(fc.api_keys.openai.is_none());
    }
}
