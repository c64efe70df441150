//! talkback - voice chat with barge-in
//!
//! Listens on the microphone, transcribes what you say, asks a language
//! model for a reply and speaks it. Talking over the reply stops it.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod llm;
pub mod logging;
pub mod sink;
pub mod stt;
pub mod tts;
pub mod turn;

// Composition root - needs everything
#[cfg(feature = "full")]
pub mod app;

// Capabilities (source → transcribe → generate → synthesize → sink)
pub use audio::output::AudioSink;
pub use audio::recorder::AudioSource;
pub use llm::client::Generator;
pub use sink::{CollectorSink, ConversationSink, LogSink};
pub use stt::transcriber::Transcriber;
pub use tts::synthesizer::Synthesizer;

// Turn machinery
pub use turn::{SpeechActivitySignal, Turn, TurnCoordinator, TurnState, TurnStatus};

// Error handling
pub use error::{Result, TalkbackError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_only_when_available() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
