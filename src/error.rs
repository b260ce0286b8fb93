//! Error types for visync.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Synthesis errors
    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Speech provider returned status {status}: {message}")]
    SynthesisHttp { status: u16, message: String },

    // Decode errors
    #[error("Audio decode failed: {message}")]
    Decode { message: String },

    #[error("Audio decode timed out after {millis}ms")]
    DecodeTimeout { millis: u64 },

    // Playback errors
    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // Character description errors
    #[error("Failed to parse character description: {message}")]
    CharacterParse { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`EngineError`] by recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider unreachable or rejected the request.
    Synthesis,
    /// Audio bytes could not be decoded or probed.
    Decode,
    /// The platform refused to play audio.
    Playback,
    /// Configuration, I/O and everything else.
    Other,
}

impl EngineError {
    /// Returns the recovery class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Synthesis { .. } | EngineError::SynthesisHttp { .. } => {
                ErrorKind::Synthesis
            }
            EngineError::Decode { .. } | EngineError::DecodeTimeout { .. } => ErrorKind::Decode,
            EngineError::Playback { .. } => ErrorKind::Playback,
            _ => ErrorKind::Other,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;
