//! Cancellable tasks and the first-completion race used for barge-in.
//!
//! Both the useful work (a generation request) and the interrupt wait are
//! spawned as [`TaskHandle`]s; [`race_and_cancel_loser`] awaits whichever
//! settles first and cancels the other.

use crate::error::{Result, TalkbackError};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle of a [`TaskHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Spawned but not yet polled.
    Pending,
    /// Work is in progress.
    Running,
    /// Work finished with a value.
    Completed,
    /// Cancelled, aborted or detached before finishing.
    Cancelled,
    /// Work returned an error or panicked.
    Failed,
}

impl TaskState {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed => 2,
            TaskState::Cancelled => 3,
            TaskState::Failed => 4,
        }
    }
}

/// State cell shared between the handle and the spawned task.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(TaskState::Pending.as_u8()))
    }

    fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Pending -> Running. Fails if the task was cancelled before it ran.
    fn start(&self) -> bool {
        self.0
            .compare_exchange(
                TaskState::Pending.as_u8(),
                TaskState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Pending -> Cancelled, for tasks cancelled before their first poll.
    fn finish_if_pending(&self) {
        self.0
            .compare_exchange(
                TaskState::Pending.as_u8(),
                TaskState::Cancelled.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok();
    }

    /// Moves to a terminal state unless one was already reached.
    fn finish(&self, terminal: TaskState) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if TaskState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                terminal.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// How a task ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(TalkbackError),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

/// A spawned, cancellable unit of work.
///
/// Dropping a handle whose task has not finished cancels the task, so work
/// never outlives the scope that started it.
pub struct TaskHandle<T> {
    name: &'static str,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    join: Option<JoinHandle<Option<Result<T>>>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Starts `work` on the runtime.
    pub fn spawn<F>(name: &'static str, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let state = Arc::new(StateCell::new());
        let cancel = CancellationToken::new();

        let join = tokio::spawn({
            let state = Arc::clone(&state);
            let cancel = cancel.clone();
            async move {
                if !state.start() {
                    return None;
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        state.finish(TaskState::Cancelled);
                        None
                    }
                    result = work => {
                        let terminal = if result.is_ok() {
                            TaskState::Completed
                        } else {
                            TaskState::Failed
                        };
                        state.finish(terminal);
                        Some(result)
                    }
                }
            }
        });

        Self {
            name,
            state,
            cancel,
            join: Some(join),
        }
    }

    /// Waits for the task to reach a terminal state.
    pub async fn join(mut self) -> TaskOutcome<T> {
        self.settled().await
    }

    /// Requests cancellation, then waits up to `grace` for the task to wind
    /// down. A task still running after `grace` is aborted and detached; its
    /// eventual result is discarded.
    pub async fn cancel_and_settle(mut self, grace: Duration) -> TaskState {
        self.cancel();
        if let Some(join) = self.join.as_mut() {
            if tokio::time::timeout(grace, &mut *join).await.is_err() {
                join.abort();
                self.state.finish(TaskState::Cancelled);
                warn!(
                    task = self.name,
                    grace_ms = grace.as_millis() as u64,
                    "task ignored cancellation, detached"
                );
            }
            self.join = None;
        }
        self.state()
    }

    /// Awaits the join handle without consuming `self`.
    ///
    /// Cancel-safe: if this future is dropped the handle keeps the task.
    async fn settled(&mut self) -> TaskOutcome<T> {
        let Some(join) = self.join.as_mut() else {
            return TaskOutcome::Cancelled;
        };
        let joined = join.await;
        self.join = None;

        match joined {
            Ok(Some(Ok(value))) => TaskOutcome::Completed(value),
            Ok(Some(Err(e))) => TaskOutcome::Failed(e),
            Ok(None) => TaskOutcome::Cancelled,
            Err(e) if e.is_cancelled() => {
                self.state.finish(TaskState::Cancelled);
                TaskOutcome::Cancelled
            }
            Err(e) => {
                self.state.finish(TaskState::Failed);
                TaskOutcome::Failed(TalkbackError::Other(format!(
                    "task '{}' panicked: {}",
                    self.name, e
                )))
            }
        }
    }
}

impl<T> TaskHandle<T> {
    /// Requests cancellation. No-op once the task is terminal.
    pub fn cancel(&self) {
        if self.state.load().is_terminal() {
            return;
        }
        self.state.finish_if_pending();
        self.cancel.cancel();
    }

    pub fn state(&self) -> TaskState {
        self.state.load()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(join) = self.join.take()
            && !self.state.load().is_terminal()
        {
            debug!(task = self.name, "dropping unfinished task, aborting");
            self.cancel.cancel();
            join.abort();
            self.state.finish(TaskState::Cancelled);
        }
    }
}

/// Which side of a race settled first.
#[derive(Debug)]
pub enum Race<A, B> {
    First(TaskOutcome<A>),
    Second(TaskOutcome<B>),
}

/// Awaits both tasks, returns the outcome of whichever settles first, and
/// cancels the other (see [`TaskHandle::cancel_and_settle`]).
///
/// Neither side is preferred: when both are ready, the pick is random.
pub async fn race_and_cancel_loser<A, B>(
    mut first: TaskHandle<A>,
    mut second: TaskHandle<B>,
    grace: Duration,
) -> Race<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let winner = tokio::select! {
        outcome = first.settled() => Race::First(outcome),
        outcome = second.settled() => Race::Second(outcome),
    };

    match &winner {
        Race::First(_) => {
            let loser = second.name();
            let state = second.cancel_and_settle(grace).await;
            debug!(winner = first.name(), loser, ?state, "race settled");
        }
        Race::Second(_) => {
            let loser = first.name();
            let state = first.cancel_and_settle(grace).await;
            debug!(winner = second.name(), loser, ?state, "race settled");
        }
    }

    winner
}
