//! Caller-side handle to a submitted task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::{TaskCell, TaskId, TaskPhase, TaskResult};
use crate::error::PoolError;
use crate::pool::Shared;

/// What a cancellation request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had not started; it was removed from the pending buffer and
    /// will never run
    Dequeued,
    /// The task was running; its cancellation token was triggered and the
    /// operation stops at its next checkpoint, if it has one
    Signalled,
    /// The task had already reached a terminal state
    AlreadyFinished,
}

/// Handle to a submitted task
///
/// Dropping the handle detaches it: the task still runs and its result is
/// discarded.
pub struct TaskHandle<T: Send + 'static> {
    cell: Arc<TaskCell>,
    shared: Arc<Shared<T>>,
    receiver: Option<oneshot::Receiver<TaskResult<T>>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(
        cell: Arc<TaskCell>,
        shared: Arc<Shared<T>>,
        receiver: oneshot::Receiver<TaskResult<T>>,
    ) -> Self {
        Self {
            cell,
            shared,
            receiver: Some(receiver),
        }
    }

    /// Identifier of the task
    pub fn id(&self) -> &TaskId {
        self.cell.id()
    }

    /// Whether a worker has picked the task up
    pub fn is_started(&self) -> bool {
        self.cell.phase() != TaskPhase::Pending
    }

    /// Whether the task reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.cell.phase() == TaskPhase::Finished
    }

    /// Request cancellation
    ///
    /// A pending task is removed from the buffer and completes as cancelled.
    /// A running task only observes the request at its own checkpoints.
    pub fn cancel(&self) -> CancelOutcome {
        self.shared.cancel(&self.cell)
    }

    /// Wait for the task's value
    ///
    /// Suspends only the caller, never a worker.
    ///
    /// # Errors
    ///
    /// - [`PoolError::TaskFailed`] if the operation failed or panicked
    /// - [`PoolError::Cancelled`] if the task was cancelled
    /// - [`PoolError::ResultConsumed`] if the result was already taken
    pub async fn wait(mut self) -> Result<T, PoolError> {
        self.result().await?.into_result()
    }

    /// Wait for the task's value, giving up after `timeout`
    ///
    /// On timeout the task is unaffected and the handle can be awaited again.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<T, PoolError> {
        let receiver = self.receiver.as_mut().ok_or(PoolError::ResultConsumed)?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(received) => {
                self.receiver = None;
                self.resolve(received).into_result()
            }
            Err(_) => Err(PoolError::Timeout { limit: timeout }),
        }
    }

    /// Wait for the full [`TaskResult`]
    pub async fn result(&mut self) -> Result<TaskResult<T>, PoolError> {
        let receiver = self.receiver.as_mut().ok_or(PoolError::ResultConsumed)?;
        let received = receiver.await;
        self.receiver = None;
        Ok(self.resolve(received))
    }

    fn resolve(
        &self,
        received: Result<TaskResult<T>, oneshot::error::RecvError>,
    ) -> TaskResult<T> {
        // The sender only disappears without a result when the runtime drops
        // the worker mid-task.
        received.unwrap_or_else(|_| TaskResult::cancelled(self.cell.id().clone()))
    }
}

impl<T: Send + 'static> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", self.cell.id())
            .field("phase", &self.cell.phase())
            .finish()
    }
}
