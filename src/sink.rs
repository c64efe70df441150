//! Where the conversation is shown.
//!
//! The coordinator reports each turn through a [`ConversationSink`]; the
//! binary prints to the terminal, tests collect.

use crate::error::TalkbackError;
use crate::turn::Turn;
use std::sync::Mutex;
use tracing::{info, warn};

/// Receives conversation events as turns progress.
pub trait ConversationSink: Send + Sync {
    /// A finalized transcript started turn `index`.
    fn user(&self, index: u64, text: &str);

    /// The reply for turn `index` is about to be spoken.
    fn assistant(&self, index: u64, text: &str);

    /// The user spoke over turn `index`.
    fn interrupted(&self, index: u64);

    fn failed(&self, index: u64, error: &TalkbackError);

    /// Turn `index` is over. Called once per turn, after everything else.
    fn finished(&self, _turn: &Turn) {}

    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Reports through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ConversationSink for LogSink {
    fn user(&self, index: u64, text: &str) {
        info!(turn = index, text, "user");
    }

    fn assistant(&self, index: u64, text: &str) {
        info!(turn = index, text, "assistant");
    }

    fn interrupted(&self, index: u64) {
        info!(turn = index, "interrupted");
    }

    fn failed(&self, index: u64, error: &TalkbackError) {
        warn!(turn = index, %error, "turn failed");
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(feature = "cli")]
pub use self::console::ConsoleSink;

#[cfg(feature = "cli")]
mod console {
    use super::ConversationSink;
    use crate::error::TalkbackError;
    use owo_colors::OwoColorize;

    /// Prints the conversation to the terminal.
    ///
    /// Replies go to stdout so they can be piped; everything else to stderr.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ConsoleSink {
        quiet: bool,
    }

    impl ConsoleSink {
        pub fn new(quiet: bool) -> Self {
            Self { quiet }
        }
    }

    impl ConversationSink for ConsoleSink {
        fn user(&self, _index: u64, text: &str) {
            if !self.quiet {
                eprintln!("{} {}", "you:".dimmed(), text);
            }
        }

        fn assistant(&self, _index: u64, text: &str) {
            println!("{} {}", "bot:".green(), text);
        }

        fn interrupted(&self, _index: u64) {
            if !self.quiet {
                eprintln!("{}", "(interrupted)".yellow());
            }
        }

        fn failed(&self, _index: u64, error: &TalkbackError) {
            eprintln!("{} {}", "error:".red(), error);
        }

        fn name(&self) -> &'static str {
            "console"
        }
    }
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkRecord {
    User(u64, String),
    Assistant(u64, String),
    Interrupted(u64),
    Failed(u64, String),
    Finished(Turn),
}

/// Keeps every call, for tests.
#[derive(Debug, Default)]
pub struct CollectorSink {
    records: Mutex<Vec<SinkRecord>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Turns reported as finished, in order.
    pub fn turns(&self) -> Vec<Turn> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SinkRecord::Finished(turn) => Some(turn),
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: SinkRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

impl ConversationSink for CollectorSink {
    fn user(&self, index: u64, text: &str) {
        self.push(SinkRecord::User(index, text.to_string()));
    }

    fn assistant(&self, index: u64, text: &str) {
        self.push(SinkRecord::Assistant(index, text.to_string()));
    }

    fn interrupted(&self, index: u64) {
        self.push(SinkRecord::Interrupted(index));
    }

    fn failed(&self, index: u64, error: &TalkbackError) {
        self.push(SinkRecord::Failed(index, error.to_string()));
    }

    fn finished(&self, turn: &Turn) {
        self.push(SinkRecord::Finished(turn.clone()));
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
