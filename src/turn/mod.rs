//! Turn-taking: the coordinator, the speech-activity signal and the
//! cancellable task primitive they share.

pub mod coordinator;
pub mod signal;
pub mod task;

pub use coordinator::{Turn, TurnCoordinator, TurnState, TurnStats, TurnStatus};
pub use signal::SpeechActivitySignal;
pub use task::{Race, TaskHandle, TaskOutcome, TaskState, race_and_cancel_loser};
