//! Pool-level events and observers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{panic_message, WorkerFault};
use crate::pool::PoolState;
use crate::task::{TaskId, TaskStatus};

/// Something that happened inside the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Lifecycle transition
    StateChanged { from: PoolState, to: PoolState },

    /// A worker finished initializing and is ready for tasks
    WorkerStarted { worker: usize },

    /// A worker exited its loop
    WorkerStopped { worker: usize },

    /// A faulted worker is being replaced
    WorkerReplaced {
        worker: usize,
        fault: WorkerFault,
        restarts: u32,
    },

    /// A task entered the pending buffer
    TaskQueued { id: TaskId, depth: usize },

    /// A worker started a task
    TaskStarted { id: TaskId, worker: usize },

    /// A task that ran reached a terminal state
    TaskFinished { id: TaskId, status: TaskStatus },

    /// A pending task was cancelled and will never run
    TaskCancelled { id: TaskId },
}

/// Receives [`PoolEvent`]s
///
/// Called synchronously from worker and submitter contexts, so
/// implementations should return quickly. `StateChanged` is delivered while
/// the pool holds its lifecycle lock: an observer must not shut down or drop
/// the pool it observes. Any closure `Fn(&PoolEvent) + Send + Sync` is an
/// observer.
pub trait PoolObserver: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

impl<F> PoolObserver for F
where
    F: Fn(&PoolEvent) + Send + Sync,
{
    fn on_event(&self, event: &PoolEvent) {
        self(event)
    }
}

/// Registered observers of one pool
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn PoolObserver>>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn PoolObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        for observer in &self.observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))) {
                warn!(
                    panic = %panic_message(&*payload),
                    event = ?event,
                    "pool observer panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.observers.len())
            .finish()
    }
}
