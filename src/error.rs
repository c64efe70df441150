//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // Service errors, one per external capability
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Missing API key: set {env_var}")]
    ApiKeyMissing { env_var: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// Device-level failures that the capture loop recovers from locally.
    pub fn is_transient_device_error(&self) -> bool {
        matches!(self, TalkbackError::AudioCapture { .. })
    }
}

pub type Result<T> = std::result::Result<T, TalkbackError>;
