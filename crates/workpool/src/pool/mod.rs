//! Bounded worker pool
//!
//! Runs submitted tasks on a fixed set of workers with a bounded FIFO pending
//! buffer. Submitters are held back (or rejected) while the buffer is full,
//! and shutdown never silently drops a task: every accepted task ends with a
//! terminal [`TaskResult`](crate::task::TaskResult).

mod queue;
mod stats;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use stats::PoolStats;

use self::queue::{Admission, Claim, PendingQueue, QueuedTask};
use self::stats::PoolCounters;
use self::worker::{supervise, WorkerInitializer};
use crate::batch::Batch;
use crate::config::{PoolConfig, SubmitMode};
use crate::error::PoolError;
use crate::events::{Observers, PoolEvent, PoolObserver};
use crate::task::{
    CancelOutcome, Task, TaskCell, TaskHandle, TaskId, TaskPhase, TaskResult, TaskStatus,
};

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Constructed, workers not yet started
    Created,
    /// Accepting submissions
    Running,
    /// Rejecting submissions, finishing accepted work
    Draining,
    /// All workers have exited
    Stopped,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`WorkerPool::shutdown`] treats outstanding work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Finish every queued and in-flight task
    Graceful,
    /// Cancel queued tasks and signal cancellation to in-flight tasks
    Immediate,
}

impl From<bool> for ShutdownMode {
    /// `true` means graceful
    fn from(graceful: bool) -> Self {
        if graceful {
            Self::Graceful
        } else {
            Self::Immediate
        }
    }
}

/// State shared by the pool, its workers, the supervisor, and task handles
pub(crate) struct Shared<T: Send + 'static> {
    pub(crate) config: PoolConfig,
    /// Held across a state change and its `StateChanged` event so observers
    /// see transitions in order. Always taken before `queue`.
    lifecycle: Mutex<()>,
    queue: Mutex<PendingQueue<T>>,
    /// Signalled whenever a submitter might now succeed: a buffer slot
    /// freed, a worker went idle, or the pool closed
    slot_freed: Notify,
    pub(crate) counters: PoolCounters,
    state_tx: watch::Sender<PoolState>,
    pub(crate) shutdown_token: CancellationToken,
    observers: Observers,
    pub(crate) initializer: Option<WorkerInitializer>,
    next_seq: AtomicU64,
}

impl<T: Send + 'static> Shared<T> {
    fn new(
        config: PoolConfig,
        observers: Observers,
        initializer: Option<WorkerInitializer>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PoolState::Created);
        Self {
            lifecycle: Mutex::new(()),
            queue: Mutex::new(PendingQueue::new(config.queue_capacity)),
            config,
            slot_freed: Notify::new(),
            counters: PoolCounters::default(),
            state_tx,
            shutdown_token: CancellationToken::new(),
            observers,
            initializer,
            next_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        self.observers.emit(event);
    }

    fn state(&self) -> PoolState {
        *self.state_tx.borrow()
    }

    /// Move the queue to `to` and publish it. Runs under the queue lock so
    /// the watch channel sees writes in lock order.
    fn set_state(&self, queue: &mut PendingQueue<T>, to: PoolState) -> PoolState {
        let from = queue.state();
        queue.set_state(to);
        self.state_tx.send_replace(to);
        from
    }

    fn announce(&self, from: PoolState, to: PoolState) {
        info!(pool = %self.config.name, from = %from, to = %to, "pool state changed");
        self.emit(PoolEvent::StateChanged { from, to });
    }

    /// Enter Running with one idle slot registered per initial worker, so
    /// the first submissions can be handed off while workers are starting.
    fn start(&self) -> Vec<oneshot::Receiver<QueuedTask<T>>> {
        let _lifecycle = self.lifecycle.lock();
        let (from, slots) = {
            let mut queue = self.queue.lock();
            let from = self.set_state(&mut queue, PoolState::Running);
            let slots = (0..self.config.worker_count)
                .map(|_| queue.register_idle())
                .collect();
            (from, slots)
        };
        self.announce(from, PoolState::Running);
        slots
    }

    fn prepare(&self, task: Task<T>) -> (QueuedTask<T>, oneshot::Receiver<TaskResult<T>>) {
        let (key, operation) = task.into_parts();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(TaskCell::new(
            TaskId::new(seq, key),
            self.shutdown_token.child_token(),
        ));
        let (reply, receiver) = oneshot::channel();

        (
            QueuedTask {
                cell,
                operation,
                reply,
            },
            receiver,
        )
    }

    fn admit(&self, task: QueuedTask<T>) -> Admission<T> {
        let id = task.cell.id().clone();

        let admission = {
            let mut queue = self.queue.lock();
            let admission = queue.admit(task);
            match &admission {
                Admission::HandedOff => self.counters.task_started(),
                Admission::Queued { depth } => self.counters.set_pending(*depth),
                Admission::Full(_) | Admission::Closed(_) => {}
            }
            admission
        };

        if let Admission::Queued { depth } = &admission {
            debug!(task_id = %id, depth, "task queued");
            self.emit(PoolEvent::TaskQueued { id, depth: *depth });
        }

        admission
    }

    pub(crate) fn claim(&self) -> Claim<T> {
        let claim = {
            let mut queue = self.queue.lock();
            let claim = queue.claim();
            match &claim {
                Claim::Run(_) => {
                    self.counters.set_pending(queue.len());
                    self.counters.task_started();
                }
                Claim::Wait(_) | Claim::Exit => {}
            }
            claim
        };

        if !matches!(claim, Claim::Exit) {
            self.slot_freed.notify_waiters();
        }
        claim
    }

    pub(crate) fn cancel(&self, cell: &Arc<TaskCell>) -> CancelOutcome {
        let removed = {
            let mut queue = self.queue.lock();
            if cell.phase() == TaskPhase::Pending {
                let removed = queue.remove(cell);
                if removed.is_some() {
                    self.counters.set_pending(queue.len());
                    self.counters.record(TaskStatus::Cancelled);
                }
                removed
            } else {
                None
            }
        };

        if let Some(task) = removed {
            self.slot_freed.notify_waiters();
            task.cell.token().cancel();
            self.finish_unstarted(task);
            return CancelOutcome::Dequeued;
        }

        match cell.phase() {
            TaskPhase::Running => {
                debug!(task_id = %cell.id(), "cancellation signalled to running task");
                cell.token().cancel();
                CancelOutcome::Signalled
            }
            TaskPhase::Pending | TaskPhase::Finished => CancelOutcome::AlreadyFinished,
        }
    }

    /// Complete a task that never reached a worker
    fn finish_unstarted(&self, task: QueuedTask<T>) {
        let id = task.cell.id().clone();
        debug!(task_id = %id, "pending task cancelled");
        self.emit(PoolEvent::TaskCancelled { id: id.clone() });
        let _ = task.reply.send(TaskResult::cancelled(id));
    }

    /// Put back a task whose worker faulted before running it
    ///
    /// The task keeps its place at the head of the buffer. After an immediate
    /// shutdown it is completed as cancelled instead.
    pub(crate) fn requeue(&self, task: QueuedTask<T>) {
        let cancelled = {
            let mut queue = self.queue.lock();
            self.counters.task_requeued();
            if self.shutdown_token.is_cancelled() {
                task.cell.set_phase(TaskPhase::Finished);
                self.counters.record(TaskStatus::Cancelled);
                Some(task)
            } else {
                if queue.requeue(task) {
                    self.counters.task_started();
                }
                self.counters.set_pending(queue.len());
                None
            }
        };

        if let Some(task) = cancelled {
            self.finish_unstarted(task);
        }
    }

    /// Leave the Running state. Returns false if shutdown was already requested.
    fn begin_shutdown(&self, mode: ShutdownMode) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let drained = {
            let mut queue = self.queue.lock();
            if queue.state() != PoolState::Running {
                return false;
            }
            queue.close();
            self.state_tx.send_replace(PoolState::Draining);

            let drained = match mode {
                ShutdownMode::Graceful => Vec::new(),
                ShutdownMode::Immediate => queue.drain(),
            };
            self.counters.set_pending(queue.len());
            for _ in &drained {
                self.counters.record(TaskStatus::Cancelled);
            }
            if mode == ShutdownMode::Immediate {
                self.shutdown_token.cancel();
            }
            drained
        };

        // Blocked submitters wake up and observe Closed
        self.slot_freed.notify_waiters();
        self.announce(PoolState::Running, PoolState::Draining);

        for task in drained {
            self.finish_unstarted(task);
        }

        true
    }

    /// Whether a faulted worker must be replaced to finish outstanding work
    pub(crate) fn needs_replacement(&self) -> bool {
        let queue = self.queue.lock();
        match queue.state() {
            PoolState::Running => true,
            PoolState::Draining => queue.len() > 0,
            PoolState::Created | PoolState::Stopped => false,
        }
    }

    pub(crate) fn mark_stopped(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.counters.set_live_workers(0);
        let from = self.set_state(&mut self.queue.lock(), PoolState::Stopped);
        self.announce(from, PoolState::Stopped);
    }
}

/// A pool of W workers executing [`Task`]s with a bounded pending buffer
///
/// # Example
///
/// ```
/// use workpool::{PoolConfig, ShutdownMode, Task, TaskContext, TaskError, WorkerPool};
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> Result<(), workpool::PoolError> {
/// let pool = WorkerPool::new(PoolConfig::new(2, 8))?;
///
/// let handle = pool
///     .submit(Task::new(|_ctx: TaskContext| async move { Ok::<_, TaskError>(6 * 7) }))
///     .await?;
/// assert_eq!(handle.wait().await?, 42);
///
/// pool.shutdown(ShutdownMode::Graceful).await?;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool and start its workers
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] if the configuration is invalid or no runtime is
    /// available.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::builder(config).build()
    }

    /// Start building a pool with observers or a worker initializer
    pub fn builder(config: PoolConfig) -> PoolBuilder<T> {
        PoolBuilder {
            config,
            observers: Observers::default(),
            initializer: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// Best-effort snapshot of the pool's counters
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.state())
    }

    /// Submit a task
    ///
    /// While the pending buffer is full this suspends the caller
    /// ([`SubmitMode::Block`]) or fails with [`PoolError::QueueFull`]
    /// ([`SubmitMode::Reject`]).
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] once shutdown has begun
    /// - [`PoolError::QueueFull`] in reject mode when no slot is free
    pub async fn submit(&self, task: Task<T>) -> Result<TaskHandle<T>, PoolError> {
        match self.shared.config.submit_mode {
            SubmitMode::Block => self.submit_until(task, None).await,
            SubmitMode::Reject => self.try_submit(task),
        }
    }

    /// Submit a task without ever waiting, whatever the configured mode
    pub fn try_submit(&self, task: Task<T>) -> Result<TaskHandle<T>, PoolError> {
        let (queued, receiver) = self.shared.prepare(task);
        let cell = Arc::clone(&queued.cell);

        match self.shared.admit(queued) {
            Admission::HandedOff | Admission::Queued { .. } => Ok(self.handle(cell, receiver)),
            Admission::Full(_) => Err(PoolError::QueueFull {
                capacity: self.shared.config.queue_capacity,
            }),
            Admission::Closed(_) => Err(PoolError::Closed),
        }
    }

    /// Submit a task, waiting at most `timeout` for a free slot
    ///
    /// # Errors
    ///
    /// [`PoolError::Timeout`] if no slot freed in time; the task is discarded.
    /// A `timeout` too large to represent as a deadline waits like
    /// [`submit`](Self::submit) in blocking mode.
    pub async fn submit_timeout(
        &self,
        task: Task<T>,
        timeout: Duration,
    ) -> Result<TaskHandle<T>, PoolError> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .map(|at| (at, timeout));
        self.submit_until(task, deadline).await
    }

    /// Submit tasks in order, respecting backpressure
    ///
    /// If any submission fails, the tasks already accepted from this call are
    /// cancelled and the error is returned.
    pub async fn submit_all<I>(&self, tasks: I) -> Result<Batch<T>, PoolError>
    where
        I: IntoIterator<Item = Task<T>>,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(err);
                }
            }
        }
        Ok(Batch::new(handles))
    }

    async fn submit_until(
        &self,
        task: Task<T>,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<TaskHandle<T>, PoolError> {
        let (mut queued, receiver) = self.shared.prepare(task);
        let cell = Arc::clone(&queued.cell);

        loop {
            // Register before trying so a slot freed in between is not missed
            let notified = self.shared.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.admit(queued) {
                Admission::HandedOff | Admission::Queued { .. } => {
                    return Ok(self.handle(cell, receiver))
                }
                Admission::Closed(_) => return Err(PoolError::Closed),
                Admission::Full(task) => queued = task,
            }

            match deadline {
                None => notified.await,
                Some((at, limit)) => {
                    if tokio::time::timeout_at(at, notified).await.is_err() {
                        debug!(task_id = %cell.id(), "submission timed out waiting for a slot");
                        return Err(PoolError::Timeout { limit });
                    }
                }
            }
        }
    }

    fn handle(
        &self,
        cell: Arc<TaskCell>,
        receiver: oneshot::Receiver<TaskResult<T>>,
    ) -> TaskHandle<T> {
        TaskHandle::new(cell, Arc::clone(&self.shared), receiver)
    }

    /// Stop the pool
    ///
    /// Graceful shutdown lets queued and in-flight tasks finish. Immediate
    /// shutdown completes queued tasks as cancelled and signals cancellation
    /// to running ones. Either way this returns once every worker has exited.
    /// Calling it again is a no-op; use [`wait_stopped`](Self::wait_stopped)
    /// to await completion from elsewhere.
    ///
    /// # Errors
    ///
    /// [`PoolError::ShutdownTimeout`] if `shutdown_timeout` is configured and
    /// workers are still busy when it expires. The pool stays Draining.
    #[instrument(skip(self), fields(pool = %self.shared.config.name))]
    pub async fn shutdown(&self, mode: ShutdownMode) -> Result<(), PoolError> {
        if !self.shared.begin_shutdown(mode) {
            debug!("shutdown already requested");
            return Ok(());
        }

        info!(?mode, "shutting down worker pool");

        match self.shared.config.shutdown_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, self.wait_stopped()).await.is_err() {
                    let stats = self.stats();
                    warn!(
                        pending = stats.pending,
                        active = stats.active,
                        "shutdown timeout reached"
                    );
                    return Err(PoolError::ShutdownTimeout);
                }
            }
            None => self.wait_stopped().await,
        }

        info!("worker pool stopped");
        Ok(())
    }

    /// Wait until the pool reaches [`PoolState::Stopped`]
    pub async fn wait_stopped(&self) {
        let mut state = self.shared.state_tx.subscribe();
        let _ = state.wait_for(|state| *state == PoolState::Stopped).await;
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.shared.begin_shutdown(ShutdownMode::Immediate) {
            warn!(pool = %self.shared.config.name, "worker pool dropped while running");
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for pools with observers or a per-worker initializer
pub struct PoolBuilder<T> {
    config: PoolConfig,
    observers: Observers,
    initializer: Option<WorkerInitializer>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> PoolBuilder<T> {
    /// Register an observer for [`PoolEvent`]s
    pub fn observer(mut self, observer: impl PoolObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Run `initializer` in each worker before it takes tasks
    ///
    /// An error or panic is a worker fault: the worker is replaced after the
    /// configured restart delay.
    pub fn worker_initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(usize) -> Result<(), String> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Validate the configuration, start the workers, and return the pool
    pub fn build(self) -> Result<WorkerPool<T>, PoolError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PoolError::Config("a worker pool must be created inside a tokio runtime".to_string())
        })?;

        info!(
            pool = %self.config.name,
            workers = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            submit_mode = %self.config.submit_mode,
            "starting worker pool"
        );

        let shared = Arc::new(Shared::new(self.config, self.observers, self.initializer));
        let slots = shared.start();
        runtime.spawn(supervise(Arc::clone(&shared), slots));

        Ok(WorkerPool { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskError};

    #[test]
    fn test_shutdown_mode_from_bool() {
        assert_eq!(ShutdownMode::from(true), ShutdownMode::Graceful);
        assert_eq!(ShutdownMode::from(false), ShutdownMode::Immediate);
    }

    #[test]
    fn test_pool_state_display() {
        assert_eq!(PoolState::Draining.to_string(), "draining");
        assert_eq!(
            serde_json::to_string(&PoolState::Stopped).unwrap(),
            "\"stopped\""
        );
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = WorkerPool::<u32>::new(PoolConfig::new(1, 1));
        assert!(matches!(result, Err(PoolError::Config(msg)) if msg.contains("tokio runtime")));
    }

    #[tokio::test]
    async fn test_invalid_config_fails() {
        let result = WorkerPool::<u32>::new(PoolConfig::new(0, 1));
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let pool = WorkerPool::new(PoolConfig::new(2, 4)).unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        let handle = pool
            .submit(Task::new(|ctx: TaskContext| async move {
                Ok::<_, TaskError>(ctx.id().seq() + 100)
            }))
            .await
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), 100);

        pool.shutdown(ShutdownMode::Graceful).await.unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);

        let stats = pool.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.live_workers, 0);
    }
}
