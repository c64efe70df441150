//! Turn-level generation with barge-in support.

use crate::config::{ConversationConfig, LlmConfig};
use crate::error::{Result, TalkbackError};
use crate::llm::client::{GenerationRequest, Generator};
use crate::llm::memory::ConversationMemory;
use crate::turn::signal::SpeechActivitySignal;
use crate::turn::task::{Race, TaskHandle, TaskOutcome, race_and_cancel_loser};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of an interruptible generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// The reply, or the interrupted placeholder.
    pub text: String,
    pub was_interrupted: bool,
}

/// Produces assistant replies and keeps the conversation memory.
pub struct TurnGenerator {
    backend: Arc<dyn Generator>,
    memory: ConversationMemory,
    system_prompt: String,
    interrupted_reply: String,
    cancel_grace: Duration,
}

impl TurnGenerator {
    pub fn new(
        backend: Arc<dyn Generator>,
        llm: &LlmConfig,
        conversation: &ConversationConfig,
    ) -> Self {
        Self {
            backend,
            memory: ConversationMemory::new(llm.max_history_turns),
            system_prompt: llm.system_prompt.clone(),
            interrupted_reply: llm.interrupted_reply.clone(),
            cancel_grace: Duration::from_millis(conversation.cancel_grace_ms),
        }
    }

    /// Replaces the placeholder returned for interrupted generations.
    pub fn with_interrupted_reply(mut self, reply: impl Into<String>) -> Self {
        self.interrupted_reply = reply.into();
        self
    }

    /// Replaces how long a cancelled request may take to wind down.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Generates a reply without interruption support.
    ///
    /// # Errors
    /// Returns `TalkbackError::Generation` if the backend fails. Failures
    /// are not retried.
    pub async fn generate(&mut self, prompt: &str) -> Result<String> {
        let request = self.request(prompt);
        let started = Instant::now();
        let reply = self.backend.generate(&request).await?;
        self.finish(prompt, &reply, started);
        Ok(reply)
    }

    /// Generates a reply, giving up as soon as `signal` is raised.
    ///
    /// The request runs as its own task and is raced against the signal. If
    /// the signal wins, the request is cancelled (and detached after the
    /// cancel grace period) before this returns, and the interrupted
    /// placeholder is returned with `was_interrupted` set. Interrupted and
    /// failed exchanges are not remembered.
    ///
    /// # Errors
    /// Returns `TalkbackError::Generation` if the backend fails first.
    pub async fn generate_interruptible(
        &mut self,
        prompt: &str,
        signal: &SpeechActivitySignal,
    ) -> Result<Generation> {
        let request = self.request(prompt);
        let started = Instant::now();

        let backend = Arc::clone(&self.backend);
        let work = TaskHandle::spawn("generation", async move {
            backend.generate(&request).await
        });
        let interrupt = signal.spawn_wait();

        match race_and_cancel_loser(work, interrupt, self.cancel_grace).await {
            Race::First(TaskOutcome::Completed(reply)) => {
                self.finish(prompt, &reply, started);
                Ok(Generation {
                    text: reply,
                    was_interrupted: false,
                })
            }
            Race::First(TaskOutcome::Failed(e)) => {
                warn!(error = %e, "generation failed");
                Err(e)
            }
            Race::First(TaskOutcome::Cancelled) => Err(TalkbackError::Generation {
                message: "generation task was cancelled".to_string(),
            }),
            Race::Second(_) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation interrupted by user speech"
                );
                Ok(Generation {
                    text: self.interrupted_reply.clone(),
                    was_interrupted: true,
                })
            }
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Forgets the conversation so far.
    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            system_prompt: self.system_prompt.clone(),
            history: self.memory.messages(),
            input: prompt.to_string(),
        }
    }

    fn finish(&mut self, prompt: &str, reply: &str, started: Instant) {
        debug!(
            model = self.backend.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = reply.chars().count(),
            "generation completed"
        );
        self.memory.record(prompt, reply);
    }
}
