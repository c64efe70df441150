//! Diagnostic logging setup.
//!
//! Logs go to stderr through `tracing`. The conversation itself is printed
//! by a [`ConversationSink`](crate::sink::ConversationSink), not logged.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter for a verbosity level: `-q` warn, default info, `-v`
/// debug, `-vv` trace. Dependencies stay at warn unless `-vv`.
pub fn default_filter(verbosity: u8, quiet: bool) -> String {
    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    if verbosity >= 2 {
        level.to_string()
    } else {
        format!("warn,talkback={}", level)
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the flags.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity, quiet)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 1);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert_eq!(default_filter(0, false), "warn,talkback=info");
        assert_eq!(default_filter(1, false), "warn,talkback=debug");
        assert_eq!(default_filter(2, false), "trace");
        assert_eq!(default_filter(0, true), "warn,talkback=warn");
    }

    #[test]
    fn test_filters_parse() {
        for (verbosity, quiet) in [(0, false), (1, false), (3, false), (0, true)] {
            assert!(EnvFilter::try_new(default_filter(verbosity, quiet)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(0, true);
        init(1, false);
    }
}
