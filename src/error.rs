//! Error types for the Cadence relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Cadence relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication/authorization error (terminal for the session)
    #[error("auth error: {0}")]
    Auth(String),

    /// Speech-to-text error (terminal for the session; audio continuity
    /// cannot be reconstructed after a gap)
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error (recoverable at segment granularity)
    #[error("TTS error: {0}")]
    Tts(String),

    /// Reply generation error (recoverable at turn granularity)
    #[error("generation error: {0}")]
    Generation(String),

    /// Audio encoding/decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Session lifecycle error
    #[error("session error: {0}")]
    Session(String),

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
