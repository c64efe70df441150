//! Speech-activity signal shared between the transcription session and the
//! turn machinery.
//!
//! The flag is sticky: once raised it stays raised until the coordinator
//! resets it at the start of the next turn.

use crate::turn::task::TaskHandle;
use std::sync::Arc;
use tokio::sync::watch;

/// "New user speech since the last reset."
///
/// Cheap to clone; all clones observe the same flag. The activity detector
/// is the only writer of `raise`, the coordinator the only caller of
/// `reset`; the generator and the player only read.
#[derive(Debug, Clone)]
pub struct SpeechActivitySignal {
    flag: Arc<watch::Sender<bool>>,
}

impl SpeechActivitySignal {
    /// Creates a cleared signal.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Raises the signal. Idempotent.
    pub fn raise(&self) {
        self.flag.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        });
    }

    /// Clears the signal.
    pub fn reset(&self) {
        self.flag.send_replace(false);
    }

    /// Returns true if raised since the last reset.
    pub fn is_raised(&self) -> bool {
        *self.flag.borrow()
    }

    /// Suspends until the signal is raised. Returns immediately if it
    /// already is.
    pub async fn wait_raised(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        rx.wait_for(|raised| *raised).await.ok();
    }

    /// Spawns `wait_raised` as a cancellable task, so it can be raced
    /// against other work with
    /// [`race_and_cancel_loser`](crate::turn::task::race_and_cancel_loser).
    pub fn spawn_wait(&self) -> TaskHandle<()> {
        let signal = self.clone();
        TaskHandle::spawn("speech-activity", async move {
            signal.wait_raised().await;
            Ok(())
        })
    }
}

impl Default for SpeechActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}
