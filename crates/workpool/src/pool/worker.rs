//! Worker loops and their supervisor

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use super::queue::{Claim, QueuedTask};
use super::Shared;
use crate::error::{panic_message, WorkerFault};
use crate::events::PoolEvent;
use crate::task::{TaskContext, TaskError, TaskOutcome, TaskPhase, TaskResult};

/// Per-worker start-up hook; receives the worker index
pub(crate) type WorkerInitializer = Arc<dyn Fn(usize) -> Result<(), String> + Send + Sync>;

/// How a worker loop ended
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// Shutdown with nothing left to run
    Finished,
    /// The worker itself faulted; `started` tells whether it got past
    /// initialization
    Faulted { fault: WorkerFault, started: bool },
}

pub(crate) struct Worker<T: Send + 'static> {
    index: usize,
    shared: Arc<Shared<T>>,
    /// Idle slot registered for this worker when the pool started
    slot: Option<oneshot::Receiver<QueuedTask<T>>>,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn new(index: usize, shared: Arc<Shared<T>>) -> Self {
        Self {
            index,
            shared,
            slot: None,
        }
    }

    fn with_slot(mut self, slot: oneshot::Receiver<QueuedTask<T>>) -> Self {
        self.slot = Some(slot);
        self
    }

    pub(crate) async fn run(mut self) -> (usize, WorkerExit) {
        let index = self.index;
        let exit = match AssertUnwindSafe(self.run_inner()).catch_unwind().await {
            Ok(exit) => exit,
            Err(payload) => WorkerExit::Faulted {
                fault: WorkerFault::Panicked(panic_message(&*payload)),
                started: true,
            },
        };

        (index, exit)
    }

    async fn run_inner(&mut self) -> WorkerExit {
        let slot = self.slot.take();

        if let Err(fault) = self.initialize() {
            if let Some(mut slot) = slot {
                slot.close();
                if let Ok(task) = slot.try_recv() {
                    debug!(task_id = %task.cell.id(), "returning task from faulted worker");
                    self.shared.requeue(task);
                }
            }
            return WorkerExit::Faulted {
                fault,
                started: false,
            };
        }

        debug!("worker started");
        self.shared.emit(PoolEvent::WorkerStarted { worker: self.index });

        if let Some(slot) = slot {
            if let Ok(task) = slot.await {
                self.execute(task).await;
            }
        }

        loop {
            match self.shared.claim() {
                Claim::Run(task) => self.execute(task).await,
                Claim::Wait(receiver) => {
                    if let Ok(task) = receiver.await {
                        self.execute(task).await;
                    }
                }
                Claim::Exit => break,
            }
        }

        debug!("worker stopped");
        self.shared.emit(PoolEvent::WorkerStopped { worker: self.index });
        WorkerExit::Finished
    }

    fn initialize(&self) -> Result<(), WorkerFault> {
        let Some(initializer) = &self.shared.initializer else {
            return Ok(());
        };

        match catch_unwind(AssertUnwindSafe(|| initializer(self.index))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(WorkerFault::Init(message)),
            Err(payload) => Err(WorkerFault::Init(format!(
                "panicked: {}",
                panic_message(&*payload)
            ))),
        }
    }

    async fn execute(&self, task: QueuedTask<T>) {
        let QueuedTask {
            cell,
            operation,
            reply,
        } = task;
        let id = cell.id().clone();
        let token = cell.token().clone();

        debug!(task_id = %id, "task started");
        self.shared.emit(PoolEvent::TaskStarted {
            id: id.clone(),
            worker: self.index,
        });

        let outcome = if token.is_cancelled() {
            // Cancelled between hand-off and start
            TaskOutcome::Cancelled
        } else {
            let ctx = TaskContext::new(id.clone(), self.index, token.clone());
            let run = async move { operation(ctx).await };

            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(value)) => TaskOutcome::Completed(value),
                Ok(Err(error)) if error.is_cancellation() && token.is_cancelled() => {
                    TaskOutcome::Cancelled
                }
                Ok(Err(error)) => TaskOutcome::Failed(error),
                Err(payload) => TaskOutcome::Failed(TaskError::from_panic(payload)),
            }
        };

        let status = outcome.status();
        match &outcome {
            TaskOutcome::Failed(error) => {
                debug!(task_id = %id, error = %error, kind = ?error.kind, "task failed")
            }
            _ => debug!(task_id = %id, status = %status, "task finished"),
        }

        cell.set_phase(TaskPhase::Finished);
        self.shared.counters.task_finished(status);
        self.shared.emit(PoolEvent::TaskFinished {
            id: id.clone(),
            status,
        });

        // A dropped handle means nobody is waiting for the result
        let _ = reply.send(TaskResult { id, outcome });
    }
}

/// Own the worker set: start W workers, replace faulted ones, and mark the
/// pool stopped once every worker has exited.
///
/// `slots` holds the idle slot registered for each initial worker.
pub(crate) async fn supervise<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    slots: Vec<oneshot::Receiver<QueuedTask<T>>>,
) {
    let worker_count = shared.config.worker_count;
    let mut workers = JoinSet::new();
    let mut restarts = vec![0u32; worker_count];

    for (index, slot) in slots.into_iter().enumerate() {
        let worker = Worker::new(index, Arc::clone(&shared)).with_slot(slot);
        spawn_worker(&mut workers, worker, None);
    }
    shared.counters.set_live_workers(workers.len());

    while let Some(joined) = workers.join_next().await {
        shared.counters.set_live_workers(workers.len());

        let (index, fault, started) = match joined {
            Ok((_, WorkerExit::Finished)) => continue,
            Ok((index, WorkerExit::Faulted { fault, started })) => (index, fault, started),
            Err(err) => {
                warn!(error = %err, "worker task ended abnormally");
                continue;
            }
        };

        if !shared.needs_replacement() {
            warn!(worker = index, fault = %fault, "worker faulted during shutdown; not replacing");
            continue;
        }

        if started {
            restarts[index] = 0;
        }
        restarts[index] += 1;
        let delay = shared.config.restart.delay_for_restart(restarts[index]);

        warn!(
            worker = index,
            fault = %fault,
            restarts = restarts[index],
            delay_ms = delay.as_millis() as u64,
            "replacing faulted worker"
        );
        shared.counters.worker_replaced();
        shared.emit(PoolEvent::WorkerReplaced {
            worker: index,
            fault,
            restarts: restarts[index],
        });

        let worker = Worker::new(index, Arc::clone(&shared));
        spawn_worker(&mut workers, worker, Some(delay));
        shared.counters.set_live_workers(workers.len());
    }

    shared.mark_stopped();
    info!(pool = %shared.config.name, "all workers exited");
}

fn spawn_worker<T: Send + 'static>(
    workers: &mut JoinSet<(usize, WorkerExit)>,
    worker: Worker<T>,
    delay: Option<std::time::Duration>,
) {
    let span = info_span!("worker", pool = %worker.shared.config.name, worker = worker.index);
    let shutdown = worker.shared.shutdown_token.clone();

    workers.spawn(
        async move {
            if let Some(delay) = delay.filter(|delay| !delay.is_zero()) {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
            worker.run().await
        }
        .instrument(span),
    );
}
