//! Error types for Parley

use thiserror::Error;

use crate::voice::CaptureErrorKind;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No capture capability is present
    #[error("capture unavailable")]
    CaptureUnavailable,

    /// Capture session reported an error
    #[error("capture error: {0}")]
    Capture(CaptureErrorKind),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// The voice session has shut down
    #[error("voice session closed")]
    SessionClosed,

    /// Reply generation error
    #[error("responder error: {0}")]
    Responder(String),

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
