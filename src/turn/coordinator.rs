//! The turn state machine.
//!
//! One transcript starts one turn: generate a reply, speak it, go back to
//! waiting. Both steps are raced against the speech-activity signal so the
//! user can talk over the assistant. Turns never overlap: the next
//! transcript is not read until the current turn is over.

use crate::llm::generator::TurnGenerator;
use crate::sink::ConversationSink;
use crate::tts::player::{PlaybackOutcome, SpeechPlayer};
use crate::turn::signal::SpeechActivitySignal;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinator state, published to the activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for a transcript.
    Idle,
    /// The last reply was interrupted; waiting for what the user said.
    Listening,
    Generating,
    Speaking,
    ShuttingDown,
}

impl TurnState {
    /// True while a turn is generating or speaking. Speech heard now is
    /// a barge-in.
    pub fn is_busy(self) -> bool {
        matches!(self, TurnState::Generating | TurnState::Speaking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Generating => "generating",
            TurnState::Speaking => "speaking",
            TurnState::ShuttingDown => "shutting-down",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed,
}

/// One exchange. Discarded once reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Starts at 1.
    pub index: u64,
    pub input: String,
    /// The reply, the interrupted placeholder, or empty if generation failed.
    pub response: String,
    pub status: TurnStatus,
}

/// Turn counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub completed: u64,
    pub interrupted: u64,
    pub failed: u64,
    /// Turns cut short by shutdown.
    pub abandoned: u64,
}

impl TurnStats {
    pub fn total(&self) -> u64 {
        self.completed + self.interrupted + self.failed + self.abandoned
    }

    fn record(&mut self, status: TurnStatus) {
        match status {
            TurnStatus::Completed => self.completed += 1,
            TurnStatus::Interrupted => self.interrupted += 1,
            TurnStatus::Failed => self.failed += 1,
        }
    }
}

/// Sequences transcripts through generation and playback.
pub struct TurnCoordinator {
    generator: TurnGenerator,
    player: SpeechPlayer,
    signal: SpeechActivitySignal,
    sink: Arc<dyn ConversationSink>,
    state: watch::Sender<TurnState>,
    turns: u64,
}

impl TurnCoordinator {
    pub fn new(
        generator: TurnGenerator,
        player: SpeechPlayer,
        signal: SpeechActivitySignal,
        sink: Arc<dyn ConversationSink>,
    ) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        Self {
            generator,
            player,
            signal,
            sink,
            state,
            turns: 0,
        }
    }

    /// Receiver for state changes. The activity detector holds one.
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn signal(&self) -> &SpeechActivitySignal {
        &self.signal
    }

    pub fn generator(&self) -> &TurnGenerator {
        &self.generator
    }

    pub fn player(&self) -> &SpeechPlayer {
        &self.player
    }

    /// Speaks `text` outside of any turn. The user can talk over it.
    pub async fn greet(&mut self, text: &str) -> PlaybackOutcome {
        self.signal.reset();
        self.set_state(TurnState::Speaking);
        let outcome = self.player.speak(text, &self.signal).await;
        match &outcome {
            PlaybackOutcome::Interrupted { .. } => self.set_state(TurnState::Listening),
            _ => self.set_state(TurnState::Idle),
        }
        outcome
    }

    /// Runs one turn for a finalized transcript.
    ///
    /// Resets the signal, then generates. An interrupted generation skips
    /// playback and leaves the coordinator `Listening` with the signal still
    /// raised; the next transcript resets it. Otherwise the reply is spoken
    /// and the coordinator ends `Idle`, however playback went.
    pub async fn handle_transcript(&mut self, text: &str) -> Turn {
        self.turns += 1;
        let index = self.turns;
        let started = Instant::now();
        self.sink.user(index, text);

        self.signal.reset();
        self.set_state(TurnState::Generating);

        let generation = match self.generator.generate_interruptible(text, &self.signal).await {
            Ok(generation) => generation,
            Err(e) => {
                self.sink.failed(index, &e);
                self.set_state(TurnState::Idle);
                return self.finish(index, text, String::new(), TurnStatus::Failed, started);
            }
        };

        if generation.was_interrupted {
            self.sink.interrupted(index);
            self.set_state(TurnState::Listening);
            return self.finish(
                index,
                text,
                generation.text,
                TurnStatus::Interrupted,
                started,
            );
        }

        self.sink.assistant(index, &generation.text);
        self.set_state(TurnState::Speaking);
        let outcome = self.player.speak(&generation.text, &self.signal).await;
        self.set_state(TurnState::Idle);

        let status = match outcome {
            PlaybackOutcome::Completed { .. } => TurnStatus::Completed,
            PlaybackOutcome::Interrupted { chunks_written } => {
                debug!(turn = index, chunks_written, "reply cut short");
                self.sink.interrupted(index);
                TurnStatus::Interrupted
            }
            PlaybackOutcome::Failed(e) => {
                self.sink.failed(index, &e);
                TurnStatus::Failed
            }
        };
        self.finish(index, text, generation.text, status, started)
    }

    /// Processes transcripts in order until `shutdown` fires or the channel
    /// closes.
    ///
    /// Shutdown drops the turn in progress, which aborts its generation
    /// request and closes its output stream. The coordinator ends in
    /// `ShuttingDown` and reads no further transcripts.
    pub async fn run(
        &mut self,
        mut transcripts: mpsc::Receiver<String>,
        shutdown: CancellationToken,
    ) -> TurnStats {
        let mut stats = TurnStats::default();
        info!("turn coordinator started");

        loop {
            let text = tokio::select! {
                _ = shutdown.cancelled() => break,
                text = transcripts.recv() => match text {
                    Some(text) => text,
                    None => {
                        debug!("transcript channel closed");
                        break;
                    }
                },
            };

            let finished = tokio::select! {
                turn = self.handle_transcript(&text) => Some(turn),
                _ = shutdown.cancelled() => None,
            };
            match finished {
                Some(turn) => stats.record(turn.status),
                None => {
                    stats.abandoned += 1;
                    warn!(turn = self.turns, state = %self.state(), "turn abandoned at shutdown");
                    break;
                }
            }
        }

        self.set_state(TurnState::ShuttingDown);
        transcripts.close();
        info!(
            completed = stats.completed,
            interrupted = stats.interrupted,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "turn coordinator stopped"
        );
        stats
    }

    fn set_state(&self, state: TurnState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "turn state");
        }
    }

    fn finish(
        &self,
        index: u64,
        input: &str,
        response: String,
        status: TurnStatus,
        started: Instant,
    ) -> Turn {
        let turn = Turn {
            index,
            input: input.to_string(),
            response,
            status,
        };
        info!(
            turn = index,
            ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );
        self.sink.finished(&turn);
        turn
    }
}
