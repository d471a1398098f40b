//! Task execution context

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{TaskError, TaskId};

/// Context handed to every task operation
///
/// The context provides:
/// - The task identifier and the index of the worker running it
/// - Cancellation detection at cooperative checkpoints
///
/// The pool never interrupts an operation. A cancellation request only takes
/// effect when the operation checks for it.
///
/// # Example
///
/// ```ignore
/// let task = Task::new(|ctx: TaskContext| async move {
///     for chunk in 0..100 {
///         // Stop here if cancellation was requested
///         ctx.checkpoint()?;
///
///         process(chunk).await?;
///     }
///     Ok(())
/// });
/// ```
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    worker: usize,
    token: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, worker: usize, token: CancellationToken) -> Self {
        Self { id, worker, token }
    }

    /// Identifier of the running task
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Index of the worker running the task
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative cancellation checkpoint
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::cancelled`] once cancellation was requested, so
    /// operations can bail out with `?`.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            return Err(TaskError::cancelled());
        }
        Ok(())
    }

    /// Resolves when cancellation is requested
    ///
    /// Useful in `select!` patterns:
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => result,
    ///     _ = ctx.cancelled() => Err(TaskError::cancelled()),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleep that ends early when cancellation is requested
    pub async fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.token.cancelled() => Err(TaskError::cancelled()),
        }
    }

    /// A token that is cancelled together with this task
    ///
    /// Hand this to nested work that must stop with the task.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
