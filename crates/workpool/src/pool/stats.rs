//! Pool counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::PoolState;
use crate::task::TaskStatus;

/// Point-in-time snapshot of pool activity
///
/// Counters are read individually without locking, so a snapshot taken while
/// tasks move between states is best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub state: PoolState,
    /// Tasks waiting in the pending buffer
    pub pending: usize,
    /// Tasks currently executing
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Workers currently alive
    pub live_workers: usize,
    /// Workers replaced after a fault
    pub workers_replaced: u64,
}

impl PoolStats {
    /// Tasks that reached a terminal state
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pending: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    live_workers: AtomicUsize,
    workers_replaced: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn set_pending(&self, depth: usize) {
        self.pending.store(depth, Ordering::Relaxed);
    }

    pub(crate) fn task_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_finished(&self, status: TaskStatus) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.record(status);
    }

    /// A handed-off task went back to the buffer without running
    pub(crate) fn task_requeued(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, status: TaskStatus) {
        let counter = match status {
            TaskStatus::Completed => &self.completed,
            TaskStatus::Failed => &self.failed,
            TaskStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_live_workers(&self, count: usize) {
        self.live_workers.store(count, Ordering::Relaxed);
    }

    pub(crate) fn worker_replaced(&self) {
        self.workers_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, state: PoolState) -> PoolStats {
        PoolStats {
            state,
            pending: self.pending.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::Relaxed),
            workers_replaced: self.workers_replaced.load(Ordering::Relaxed),
        }
    }
}
