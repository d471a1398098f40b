//! Pending buffer and idle-worker hand-off
//!
//! Everything here runs under the pool's queue lock. Two invariants hold
//! whenever the lock is released:
//! - `pending.len() <= capacity`, plus any tasks put back by a worker that
//!   faulted while starting
//! - if any worker is idle, `pending` is empty

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::oneshot;

use super::PoolState;
use crate::task::{BoxedOperation, TaskCell, TaskPhase, TaskResult};

/// Upper bound on the buffer space reserved up front
const MAX_PREALLOCATED: usize = 1024;

/// A task waiting for, or on its way to, a worker
pub(crate) struct QueuedTask<T> {
    pub(crate) cell: Arc<TaskCell>,
    pub(crate) operation: BoxedOperation<T>,
    pub(crate) reply: oneshot::Sender<TaskResult<T>>,
}

/// Result of offering a task to the queue
pub(crate) enum Admission<T> {
    /// An idle worker took the task directly
    HandedOff,
    /// The task was buffered; `depth` is the buffer length afterwards
    Queued { depth: usize },
    /// No idle worker and no free slot
    Full(QueuedTask<T>),
    /// The pool no longer accepts submissions
    Closed(QueuedTask<T>),
}

/// What a worker should do next
pub(crate) enum Claim<T> {
    Run(QueuedTask<T>),
    /// Nothing buffered; wait for a hand-off or for the sender to be dropped
    Wait(oneshot::Receiver<QueuedTask<T>>),
    Exit,
}

pub(crate) struct PendingQueue<T> {
    state: PoolState,
    capacity: usize,
    pending: VecDeque<QueuedTask<T>>,
    idle: VecDeque<oneshot::Sender<QueuedTask<T>>>,
}

impl<T> PendingQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: PoolState::Created,
            capacity,
            pending: VecDeque::with_capacity(capacity.min(MAX_PREALLOCATED)),
            idle: VecDeque::new(),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PoolState) {
        self.state = state;
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn admit(&mut self, mut task: QueuedTask<T>) -> Admission<T> {
        if self.state != PoolState::Running {
            return Admission::Closed(task);
        }

        task = match self.hand_off(task) {
            Ok(()) => return Admission::HandedOff,
            Err(task) => task,
        };

        if self.pending.len() >= self.capacity {
            return Admission::Full(task);
        }

        self.pending.push_back(task);
        Admission::Queued {
            depth: self.pending.len(),
        }
    }

    /// Give the task to an idle worker, if the buffer is empty and one is waiting
    fn hand_off(&mut self, mut task: QueuedTask<T>) -> Result<(), QueuedTask<T>> {
        if !self.pending.is_empty() {
            return Err(task);
        }

        while let Some(worker) = self.idle.pop_front() {
            task.cell.set_phase(TaskPhase::Running);
            match worker.send(task) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    // Receiver gone: that worker is no longer waiting
                    returned.cell.set_phase(TaskPhase::Pending);
                    task = returned;
                }
            }
        }
        Err(task)
    }

    /// Register an idle slot for a worker that will wait on the receiver
    pub(crate) fn register_idle(&mut self) -> oneshot::Receiver<QueuedTask<T>> {
        let (sender, receiver) = oneshot::channel();
        self.idle.push_back(sender);
        receiver
    }

    /// Return a handed-off task that never ran. Returns true if another idle
    /// worker took it, false if it went back to the head of the buffer.
    pub(crate) fn requeue(&mut self, mut task: QueuedTask<T>) -> bool {
        task.cell.set_phase(TaskPhase::Pending);
        if self.state == PoolState::Running {
            task = match self.hand_off(task) {
                Ok(()) => return true,
                Err(task) => task,
            };
        }

        self.pending.push_front(task);
        false
    }

    pub(crate) fn claim(&mut self) -> Claim<T> {
        if let Some(task) = self.pending.pop_front() {
            task.cell.set_phase(TaskPhase::Running);
            return Claim::Run(task);
        }

        if self.state != PoolState::Running {
            return Claim::Exit;
        }

        Claim::Wait(self.register_idle())
    }

    /// Remove a still-pending task
    pub(crate) fn remove(&mut self, cell: &Arc<TaskCell>) -> Option<QueuedTask<T>> {
        let position = self
            .pending
            .iter()
            .position(|task| Arc::ptr_eq(&task.cell, cell))?;
        let task = self.pending.remove(position)?;
        task.cell.set_phase(TaskPhase::Finished);
        Some(task)
    }

    /// Stop accepting submissions and release idle workers
    pub(crate) fn close(&mut self) {
        self.state = PoolState::Draining;
        self.idle.clear();
    }

    /// Take every pending task out of the buffer
    pub(crate) fn drain(&mut self) -> Vec<QueuedTask<T>> {
        let drained: Vec<_> = self.pending.drain(..).collect();
        for task in &drained {
            task.cell.set_phase(TaskPhase::Finished);
        }
        drained
    }
}
