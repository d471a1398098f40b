//! Error types for the worker pool

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskError, TaskId};

/// Errors surfaced through the pool's caller-facing API
///
/// Task failures are not raised into the pool's control flow: they are
/// attached to the task's result and only become a `PoolError` when the
/// caller converts that result with [`TaskResult::into_result`].
///
/// [`TaskResult::into_result`]: crate::task::TaskResult::into_result
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Invalid construction parameters
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// Submission rejected because the pending buffer is full
    #[error("pending queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Submission or await exceeded the caller's deadline
    #[error("operation timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// Submission after the pool started draining or stopped
    #[error("worker pool is closed")]
    Closed,

    /// The task was cancelled before it produced a value
    #[error("task {id} was cancelled")]
    Cancelled { id: TaskId },

    /// The task's operation failed or panicked
    #[error("task {id} failed: {source}")]
    TaskFailed {
        id: TaskId,
        #[source]
        source: TaskError,
    },

    /// Workers did not stop within the configured shutdown timeout
    #[error("shutdown timed out while waiting for workers")]
    ShutdownTimeout,

    /// The handle's result has already been taken
    #[error("task result was already consumed")]
    ResultConsumed,
}

impl PoolError {
    /// Whether the caller may reasonably retry the same request on this pool
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::Timeout { .. })
    }
}

/// A fault in a worker itself, as opposed to a fault in a task it runs
///
/// Never returned to callers. The supervisor replaces the faulted worker and
/// reports the fault through [`PoolEvent::WorkerReplaced`].
///
/// [`PoolEvent::WorkerReplaced`]: crate::events::PoolEvent::WorkerReplaced
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum WorkerFault {
    /// The per-worker initializer failed or panicked
    #[error("worker initializer failed: {0}")]
    Init(String),

    /// The worker loop panicked outside of task execution
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
