//! Command-line interface for talkback
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice chat with barge-in
#[derive(Parser, Debug)]
#[command(
    name = "talkback",
    version,
    about = "Talk to a language model; talk over it to interrupt"
)]
pub struct Cli {
    /// Subcommand to execute (default: start the voice loop)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print replies and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device name
    #[arg(long, global = true, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device name
    #[arg(long, global = true, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Transcription language code (e.g., zh, en)
    #[arg(long, global = true, value_name = "LANG")]
    pub language: Option<String>,

    /// Language model name
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Skip the spoken greeting at startup
    #[arg(long)]
    pub no_greeting: bool,

    /// How long an interrupted request may take to wind down. Examples: 250ms, 1s
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub cancel_grace: Option<Duration>,
}

/// Parse a duration string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`250ms`, `1s`, `1s500ms`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List audio input and output devices
    Devices,

    /// Text chat with the language model (type exit, q or bye to leave)
    Chat,

    /// Speak one line of text through the output device
    Say {
        /// Text to speak
        text: String,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
