//! Error types for the duet voice agent

use thiserror::Error;

/// Result type alias for duet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the duet voice agent
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Conversational engine error
    #[error("engine error: {0}")]
    Engine(String),

    /// Interrupt classifier error
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Peer agent channel error
    #[error("peer error: {0}")]
    Peer(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
