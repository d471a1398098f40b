//! Tasks, their results, and caller handles
//!
//! This module provides:
//! - [`Task`] - A unit of work: an async operation plus an optional key
//! - [`TaskContext`] - Cancellation checkpoint handed to the operation
//! - [`TaskHandle`] - Caller-held reference to a submitted task
//! - [`TaskResult`] - A task identifier paired with its [`TaskOutcome`]

mod context;
mod error;
mod handle;

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use context::TaskContext;
pub use error::{FailureKind, TaskError};
pub use handle::{CancelOutcome, TaskHandle};

use crate::error::PoolError;

/// Identifier of a submitted task
///
/// Every task gets a pool-assigned sequence number in submission order. A
/// caller-supplied key, when present, is used for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    seq: u64,
    key: Option<String>,
}

impl TaskId {
    pub(crate) fn new(seq: u64, key: Option<String>) -> Self {
        Self { seq, key }
    }

    /// Pool-assigned sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Caller-supplied key, if any
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key}"),
            None => write!(f, "task-{}", self.seq),
        }
    }
}

pub(crate) type BoxedOperation<T> =
    Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, Result<T, TaskError>> + Send>;

/// A unit of work submitted to the pool
///
/// # Example
///
/// ```
/// use workpool::{Task, TaskContext, TaskError};
///
/// let task = Task::new(|_ctx: TaskContext| async move { Ok::<_, TaskError>(21 * 2) })
///     .with_key("answer");
/// assert_eq!(task.key(), Some("answer"));
/// ```
pub struct Task<T> {
    key: Option<String>,
    operation: BoxedOperation<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Create a task from an async operation
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            key: None,
            operation: Box::new(move |ctx| Box::pin(operation(ctx))),
        }
    }

    /// Attach a caller-supplied key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl<T> Task<T> {
    /// The caller-supplied key, if any
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub(crate) fn into_parts(self) -> (Option<String>, BoxedOperation<T>) {
        (self.key, self.operation)
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Terminal state of a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    /// The operation produced a value
    Completed(T),
    /// The operation failed or panicked
    Failed(TaskError),
    /// The task was cancelled before producing a value
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// Value-free summary of the outcome
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Value-free summary of a [`TaskOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task identifier paired with the task's outcome
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult<T> {
    pub id: TaskId,
    pub outcome: TaskOutcome<T>,
}

impl<T> TaskResult<T> {
    pub(crate) fn cancelled(id: TaskId) -> Self {
        Self {
            id,
            outcome: TaskOutcome::Cancelled,
        }
    }

    /// Convert into the value or the matching [`PoolError`]
    pub fn into_result(self) -> Result<T, PoolError> {
        match self.outcome {
            TaskOutcome::Completed(value) => Ok(value),
            TaskOutcome::Failed(source) => Err(PoolError::TaskFailed {
                id: self.id,
                source,
            }),
            TaskOutcome::Cancelled => Err(PoolError::Cancelled { id: self.id }),
        }
    }
}

/// Where a task is in its life
///
/// `Pending -> Running` and `Pending -> Finished` only happen under the pool's
/// queue lock, which makes dequeue and cancel-while-pending mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    Pending,
    Running,
    Finished,
}

const PHASE_PENDING: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_FINISHED: u8 = 2;

/// State shared between a queued task, its worker, and its handle
#[derive(Debug)]
pub(crate) struct TaskCell {
    id: TaskId,
    phase: AtomicU8,
    token: CancellationToken,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, token: CancellationToken) -> Self {
        Self {
            id,
            phase: AtomicU8::new(PHASE_PENDING),
            token,
        }
    }

    pub(crate) fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn phase(&self) -> TaskPhase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_PENDING => TaskPhase::Pending,
            PHASE_RUNNING => TaskPhase::Running,
            _ => TaskPhase::Finished,
        }
    }

    pub(crate) fn set_phase(&self, phase: TaskPhase) {
        let raw = match phase {
            TaskPhase::Pending => PHASE_PENDING,
            TaskPhase::Running => PHASE_RUNNING,
            TaskPhase::Finished => PHASE_FINISHED,
        };
        self.phase.store(raw, Ordering::Release);
    }
}
