//! Batches of submitted tasks

use futures::future::join_all;
use futures::stream::{FuturesUnordered, Stream};

use crate::error::PoolError;
use crate::task::{CancelOutcome, TaskHandle, TaskId, TaskResult};

/// Handles of tasks submitted together through
/// [`WorkerPool::submit_all`](crate::WorkerPool::submit_all)
///
/// Results can be collected in submission order or consumed as they
/// complete.
#[derive(Debug)]
pub struct Batch<T: Send + 'static> {
    handles: Vec<TaskHandle<T>>,
}

impl<T: Send + 'static> Batch<T> {
    pub(crate) fn new(handles: Vec<TaskHandle<T>>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Task identifiers in submission order
    pub fn ids(&self) -> Vec<TaskId> {
        self.handles.iter().map(|handle| handle.id().clone()).collect()
    }

    pub fn handles(&self) -> &[TaskHandle<T>] {
        &self.handles
    }

    /// Request cancellation of every task in the batch
    pub fn cancel_all(&self) -> Vec<CancelOutcome> {
        self.handles.iter().map(|handle| handle.cancel()).collect()
    }

    /// Wait for every task; results are indexed by submission position
    pub async fn collect_ordered(self) -> Vec<Result<T, PoolError>> {
        join_all(self.handles.into_iter().map(|handle| handle.wait())).await
    }

    /// Results in completion order
    ///
    /// Yields exactly one [`TaskResult`] per task.
    pub fn into_completions(self) -> impl Stream<Item = TaskResult<T>> {
        self.handles
            .into_iter()
            .map(|mut handle| async move {
                // A handle from a batch has never been awaited, so its
                // result is always available here
                match handle.result().await {
                    Ok(result) => result,
                    Err(_) => TaskResult::cancelled(handle.id().clone()),
                }
            })
            .collect::<FuturesUnordered<_>>()
    }
}

impl<T: Send + 'static> IntoIterator for Batch<T> {
    type Item = TaskHandle<T>;
    type IntoIter = std::vec::IntoIter<TaskHandle<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}
