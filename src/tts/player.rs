//! Chunked, interruptible speech playback.
//!
//! The synthesized buffer is written to the device in `chunk_ms` slices.
//! Between slices the player yields and checks the speech-activity signal
//! and its own stop flag, so an interruption takes effect within one chunk.

use crate::audio::output::{AudioSink, OutputStream};
use crate::config::PlaybackConfig;
use crate::error::{Result, TalkbackError};
use crate::tts::synthesizer::Synthesizer;
use crate::turn::signal::SpeechActivitySignal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a call to [`SpeechPlayer::speak`] ended.
#[derive(Debug)]
pub enum PlaybackOutcome {
    /// Every chunk was written and drained.
    Completed { chunks: usize },
    /// Stopped early by user speech or a stop request.
    Interrupted { chunks_written: usize },
    /// Synthesis or the output device failed.
    Failed(TalkbackError),
}

impl PlaybackOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PlaybackOutcome::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, PlaybackOutcome::Interrupted { .. })
    }
}

/// Number of samples in one playback chunk. Never zero.
pub fn chunk_samples(sample_rate: u32, chunk_ms: u32) -> usize {
    ((sample_rate as u64 * chunk_ms as u64 / 1000) as usize).max(1)
}

/// Cloneable handle that stops the playback in progress.
#[derive(Debug, Clone)]
pub struct PlaybackStopper {
    stop: Arc<AtomicBool>,
}

impl PlaybackStopper {
    /// Stops the current playback at its next chunk boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Closes the stream on every exit path, including the future being
/// dropped mid-write.
struct StreamGuard {
    stream: Box<dyn OutputStream>,
}

impl StreamGuard {
    fn open(sink: &dyn AudioSink, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            stream: sink.open(sample_rate)?,
        })
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stream.close();
    }
}

/// Turns reply text into audible speech.
pub struct SpeechPlayer {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    chunk_ms: u32,
    stop: Arc<AtomicBool>,
}

impl SpeechPlayer {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        playback: &PlaybackConfig,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            chunk_ms: playback.chunk_ms.max(1),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn chunk_ms(&self) -> u32 {
        self.chunk_ms
    }

    /// Handle for stopping playback from elsewhere.
    pub fn stopper(&self) -> PlaybackStopper {
        PlaybackStopper {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Stops the current playback at its next chunk boundary.
    ///
    /// The request lasts until that `speak` call returns; a new call starts
    /// with the flag cleared.
    pub fn stop_playback(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Synthesizes `text` and plays it, stopping early if `signal` is raised.
    ///
    /// Synthesis failure returns `Failed` before the device is touched. The
    /// output stream is opened only once there is audio to play and is
    /// always closed before this returns.
    pub async fn speak(&self, text: &str, signal: &SpeechActivitySignal) -> PlaybackOutcome {
        self.stop.store(false, Ordering::SeqCst);
        let started = Instant::now();

        let audio = match self.synthesizer.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "speech synthesis failed");
                return PlaybackOutcome::Failed(e);
            }
        };

        let chunk_len = chunk_samples(audio.sample_rate, self.chunk_ms);
        let total = audio.samples.len().div_ceil(chunk_len);
        debug!(
            voice = self.synthesizer.voice(),
            synth_ms = started.elapsed().as_millis() as u64,
            audio_ms = audio.duration_ms(),
            chunks = total,
            "starting playback"
        );

        if self.should_stop(signal) {
            info!(chunks_written = 0, "playback interrupted before start");
            return PlaybackOutcome::Interrupted { chunks_written: 0 };
        }
        if total == 0 {
            return PlaybackOutcome::Completed { chunks: 0 };
        }

        let mut guard = match StreamGuard::open(self.sink.as_ref(), audio.sample_rate) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "failed to open output stream");
                return PlaybackOutcome::Failed(e);
            }
        };

        let mut written = 0;
        for chunk in audio.samples.chunks(chunk_len) {
            if let Err(e) = guard.stream.write(chunk).await {
                warn!(error = %e, chunks_written = written, "playback write failed");
                return PlaybackOutcome::Failed(e);
            }
            written += 1;

            tokio::task::yield_now().await;
            if self.should_stop(signal) {
                drop(guard);
                info!(chunks_written = written, total, "playback interrupted");
                return PlaybackOutcome::Interrupted {
                    chunks_written: written,
                };
            }
        }

        if let Err(e) = guard.stream.drain().await {
            warn!(error = %e, "failed to drain output stream");
            return PlaybackOutcome::Failed(e);
        }
        drop(guard);

        debug!(chunks = written, "playback completed");
        PlaybackOutcome::Completed { chunks: written }
    }

    fn should_stop(&self, signal: &SpeechActivitySignal) -> bool {
        signal.is_raised() || self.stop.load(Ordering::SeqCst)
    }
}
