//! Application entry points.
//!
//! Builds the real components (microphone, speaker, HTTP services) and
//! hands them to the conversation wiring:
//! listen → transcribe → generate → speak

use crate::audio::capture::CpalAudioSource;
use crate::audio::output::CpalAudioSink;
use crate::config::Config;
use crate::conversation::{ConversationOptions, Services, chat_loop, run_conversation};
use crate::error::{Result, TalkbackError};
use crate::llm::client::HttpGenerator;
use crate::llm::generator::TurnGenerator;
use crate::sink::ConsoleSink;
use crate::stt::transcriber::HttpTranscriber;
use crate::tts::player::{PlaybackOutcome, SpeechPlayer};
use crate::tts::synthesizer::HttpSynthesizer;
use crate::turn::signal::SpeechActivitySignal;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run the voice loop until SIGINT/SIGTERM.
///
/// # Errors
/// Returns an error if a device or service client cannot be set up, or if
/// transcription fails for good.
pub async fn run_voice_command(
    config: Config,
    options: ConversationOptions,
    quiet: bool,
) -> Result<()> {
    let services = Services {
        transcriber: Arc::new(HttpTranscriber::new(&config.stt)?),
        generator: Arc::new(HttpGenerator::new(&config.llm)?),
        synthesizer: Arc::new(HttpSynthesizer::new(&config.tts)?),
        output: Arc::new(CpalAudioSink::new(config.audio.output_device.as_deref())),
        sink: Arc::new(ConsoleSink::new(quiet)),
    };
    let source = CpalAudioSource::new(config.audio.input_device.as_deref(), config.audio.sample_rate)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if !quiet {
        eprintln!("Ready. Speak any time; talk over a reply to interrupt. Ctrl+C to quit.");
    }
    let stats = run_conversation(&config, source, services, &options, shutdown).await?;

    if !quiet {
        eprintln!(
            "\nShutting down. {} turns ({} interrupted, {} failed).",
            stats.total(),
            stats.interrupted,
            stats.failed
        );
    }
    Ok(())
}

/// Text chat with the language model on stdin/stdout.
///
/// # Errors
/// Returns an error if the generation client cannot be set up or stdin
/// cannot be read.
pub async fn run_chat_command(config: Config, quiet: bool) -> Result<()> {
    let backend = Arc::new(HttpGenerator::new(&config.llm)?);
    let mut generator = TurnGenerator::new(backend, &config.llm, &config.conversation);
    let sink = ConsoleSink::new(quiet);

    if !quiet {
        eprintln!(
            "Chatting with {}. Type exit, q or bye to leave.",
            generator.model_name()
        );
    }
    let exchanges = chat_loop(&mut generator, BufReader::new(tokio::io::stdin()), &sink).await?;
    debug!(exchanges, "chat ended");
    Ok(())
}

/// Speak one line of text. Ctrl+C stops playback.
///
/// # Errors
/// Returns the synthesis or playback error if speaking failed.
pub async fn run_say_command(config: Config, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(TalkbackError::Other("Nothing to say".to_string()));
    }
    let player = SpeechPlayer::new(
        Arc::new(HttpSynthesizer::new(&config.tts)?),
        Arc::new(CpalAudioSink::new(config.audio.output_device.as_deref())),
        &config.playback,
    );

    let stopper = player.stopper();
    let watcher = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        stopper.stop();
    });

    let outcome = player.speak(text, &SpeechActivitySignal::new()).await;
    watcher.abort();

    match outcome {
        PlaybackOutcome::Completed { chunks } => {
            info!(chunks, "done");
            Ok(())
        }
        PlaybackOutcome::Interrupted { chunks_written } => {
            info!(chunks_written, "stopped");
            Ok(())
        }
        PlaybackOutcome::Failed(e) => Err(e),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("received SIGINT");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM");
        }
    }
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
