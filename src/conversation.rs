//! Wiring of a full voice conversation.
//!
//! capture → transcription session → coordinator → generator / player.
//! The components are built from explicit capability objects, so the same
//! wiring runs against real services or mocks.

use crate::audio::output::AudioSink;
use crate::audio::recorder::AudioSource;
use crate::audio::stream::{AudioCaptureStream, CaptureConfig};
use crate::config::Config;
use crate::error::Result;
use crate::llm::client::Generator;
use crate::llm::generator::TurnGenerator;
use crate::sink::ConversationSink;
use crate::stt::session::{ActivityDetector, SessionConfig, TranscriptionSession};
use crate::stt::transcriber::Transcriber;
use crate::tts::player::SpeechPlayer;
use crate::tts::synthesizer::Synthesizer;
use crate::turn::coordinator::{TurnCoordinator, TurnStats};
use crate::turn::signal::SpeechActivitySignal;
use crate::turn::task::{TaskHandle, TaskOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Transcripts waiting for the coordinator.
const TRANSCRIPT_QUEUE: usize = 16;

/// Words that end the text chat.
const EXIT_WORDS: &[&str] = &["exit", "q", "quit", "bye"];

/// The external capabilities a conversation talks to.
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output: Arc<dyn AudioSink>,
    pub sink: Arc<dyn ConversationSink>,
}

/// Per-run switches that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConversationOptions {
    /// Speak the configured greeting first.
    pub greeting: bool,
    /// Overrides `conversation.cancel_grace_ms`.
    pub cancel_grace: Option<Duration>,
}

impl ConversationOptions {
    fn cancel_grace(&self, config: &Config) -> Duration {
        self.cancel_grace
            .unwrap_or(Duration::from_millis(config.conversation.cancel_grace_ms))
    }
}

/// Runs a voice conversation until `shutdown` fires, the capture ends, or
/// transcription fails.
///
/// The capture stream is owned here and closed before returning.
///
/// # Errors
/// Returns an error if the capture device cannot start, or the
/// `TalkbackError::Transcription` that ended the session. Turn-level
/// failures are reported to the sink and do not end the run.
pub async fn run_conversation<A: AudioSource + 'static>(
    config: &Config,
    source: A,
    services: Services,
    options: &ConversationOptions,
    shutdown: CancellationToken,
) -> Result<TurnStats> {
    let grace = options.cancel_grace(config);
    let signal = SpeechActivitySignal::new();
    let generator = TurnGenerator::new(services.generator, &config.llm, &config.conversation)
        .with_cancel_grace(grace);
    let player = SpeechPlayer::new(services.synthesizer, services.output, &config.playback);
    let mut coordinator = TurnCoordinator::new(generator, player, signal.clone(), services.sink);
    let detector = ActivityDetector::new(signal, coordinator.subscribe());

    let (audio, mut capture) =
        AudioCaptureStream::new(source, CaptureConfig::from_config(&config.audio)).start()?;
    let (transcript_tx, transcripts) = mpsc::channel(TRANSCRIPT_QUEUE);

    let session = TranscriptionSession::new(
        services.transcriber,
        SessionConfig::from_config(config),
        detector,
    );
    // Set before `shutdown` fires, so the coordinator never stops on a
    // session failure without seeing it here.
    let session_failed = CancellationToken::new();
    let session = TaskHandle::spawn("transcription", {
        let shutdown = shutdown.clone();
        let session_failed = session_failed.clone();
        async move {
            let result = session.run(audio, transcript_tx).await;
            if let Err(e) = &result {
                error!(error = %e, "transcription session failed");
                session_failed.cancel();
                shutdown.cancel();
            }
            result
        }
    });

    if options.greeting && !config.conversation.greeting.is_empty() {
        tokio::select! {
            outcome = coordinator.greet(&config.conversation.greeting) => {
                debug!(?outcome, "greeting finished");
            }
            _ = shutdown.cancelled() => {}
        }
    }

    info!("listening");
    let stats = coordinator.run(transcripts, shutdown).await;
    capture.close();
    debug!(recoveries = capture.recoveries(), "capture closed");

    if session_failed.is_cancelled() || session.state().is_terminal() {
        if let TaskOutcome::Failed(e) = session.join().await {
            return Err(e);
        }
    } else {
        let state = session.cancel_and_settle(grace).await;
        debug!(?state, "transcription session stopped");
    }
    Ok(stats)
}

/// True for lines that end the text chat.
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_WORDS.iter().any(|word| line.eq_ignore_ascii_case(word))
}

/// Text chat: one generated reply per input line.
///
/// Blank lines are skipped. Stops at an exit word or end of input and
/// returns the number of exchanges. A failed request is reported to the
/// sink and the chat continues.
pub async fn chat_loop<R: AsyncBufRead + Unpin>(
    generator: &mut TurnGenerator,
    input: R,
    sink: &dyn ConversationSink,
) -> Result<u64> {
    let mut lines = input.lines();
    let mut exchanges = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit_command(line) {
            break;
        }
        exchanges += 1;
        sink.user(exchanges, line);
        match generator.generate(line).await {
            Ok(reply) => sink.assistant(exchanges, &reply),
            Err(e) => sink.failed(exchanges, &e),
        }
    }

    Ok(exchanges)
}
