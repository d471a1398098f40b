// Synthetic load against a worker pool

use std::future::Future;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use workpool::{
    PoolError, PoolStats, ShutdownMode, Task, TaskContext, TaskError, TaskHandle, TaskOutcome,
    TaskStatus, WorkerPool,
};

/// What to submit
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub tasks: usize,
    pub task_duration: Duration,
    /// Probability (0.0-1.0) that a task fails instead of completing
    pub failure_rate: f64,
    pub shutdown: ShutdownMode,
}

/// Outcome of one load run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub submitted: usize,
    pub rejected: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// The run was cut short and outstanding tasks were cancelled
    pub interrupted: bool,
    pub elapsed_ms: u64,
    pub stats: PoolStats,
}

/// Build the synthetic task for position `index`
///
/// The task sleeps cooperatively, so immediate shutdown interrupts it.
pub fn synthetic_task(index: usize, duration: Duration, fail: bool) -> Task<usize> {
    Task::new(move |ctx: TaskContext| async move {
        ctx.sleep(duration).await?;
        if fail {
            return Err(TaskError::new(format!("synthetic failure in task {index}"))
                .with_details(serde_json::json!({ "index": index })));
        }
        Ok::<_, TaskError>(index)
    })
    .with_key(format!("load-{index}"))
}

/// Submit the plan, shut the pool down, and tally every result
///
/// If `interrupt` resolves first, every outstanding task is cancelled and the
/// pool is stopped, whether it was still accepting work or already draining.
pub async fn run<F>(
    pool: &WorkerPool<usize>,
    plan: &LoadPlan,
    interrupt: F,
) -> Result<LoadReport, PoolError>
where
    F: Future<Output = ()>,
{
    let started = Instant::now();
    let mut handles = Vec::with_capacity(plan.tasks);
    let mut rejected = 0;

    let interrupted = tokio::select! {
        result = drive(pool, plan, &mut handles, &mut rejected) => {
            result?;
            false
        }
        _ = interrupt => true,
    };

    if interrupted {
        warn!(outstanding = handles.len(), "run interrupted; cancelling outstanding tasks");
        pool.shutdown(ShutdownMode::Immediate).await?;
        for handle in &handles {
            handle.cancel();
        }
        pool.wait_stopped().await;
    }

    let submitted = handles.len();
    let counts = tally(handles).await;

    Ok(LoadReport {
        submitted,
        rejected,
        completed: counts.completed,
        failed: counts.failed,
        cancelled: counts.cancelled,
        interrupted,
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: pool.stats(),
    })
}

async fn drive(
    pool: &WorkerPool<usize>,
    plan: &LoadPlan,
    handles: &mut Vec<TaskHandle<usize>>,
    rejected: &mut usize,
) -> Result<(), PoolError> {
    for index in 0..plan.tasks {
        let fail = plan.failure_rate > 0.0 && rand::thread_rng().gen_bool(plan.failure_rate);
        let task = synthetic_task(index, plan.task_duration, fail);

        match pool.submit(task).await {
            Ok(handle) => handles.push(handle),
            Err(err @ PoolError::QueueFull { .. }) => {
                debug!(index, error = %err, "submission rejected");
                *rejected += 1;
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        submitted = handles.len(),
        rejected,
        mode = ?plan.shutdown,
        "all tasks submitted; shutting down"
    );
    pool.shutdown(plan.shutdown).await
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    failed: usize,
    cancelled: usize,
}

async fn tally(handles: Vec<TaskHandle<usize>>) -> Tally {
    let mut tally = Tally::default();

    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .map(|mut handle| async move { handle.result().await })
        .collect();

    while let Some(result) = pending.next().await {
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "task result unavailable");
                continue;
            }
        };

        match result.outcome.status() {
            TaskStatus::Completed => tally.completed += 1,
            TaskStatus::Failed => tally.failed += 1,
            TaskStatus::Cancelled => tally.cancelled += 1,
        }
        if let TaskOutcome::Failed(error) = &result.outcome {
            debug!(task_id = %result.id, error = %error, "task failed");
        }
    }

    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;
    use workpool::{PoolConfig, PoolState};

    fn plan(tasks: usize, failure_rate: f64, shutdown: ShutdownMode) -> LoadPlan {
        LoadPlan {
            tasks,
            task_duration: Duration::from_millis(1),
            failure_rate,
            shutdown,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_graceful_run_completes_everything() {
        let pool = WorkerPool::new(PoolConfig::new(4, 16)).unwrap();
        let report = run(&pool, &plan(50, 0.0, ShutdownMode::Graceful), future::pending())
            .await
            .unwrap();

        assert_eq!(report.submitted, 50);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.completed, 50);
        assert_eq!(report.stats.completed, 50);
        assert_eq!(report.stats.state, PoolState::Stopped);
        assert!(!report.interrupted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_task_fails_at_full_rate() {
        let pool = WorkerPool::new(PoolConfig::new(2, 8)).unwrap();
        let report = run(&pool, &plan(10, 1.0, ShutdownMode::Graceful), future::pending())
            .await
            .unwrap();

        assert_eq!(report.failed, 10);
        assert_eq!(report.completed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_run_accounts_for_every_task() {
        let pool = WorkerPool::new(PoolConfig::new(1, 32)).unwrap();
        let mut load = plan(20, 0.0, ShutdownMode::Immediate);
        load.task_duration = Duration::from_secs(30);

        let report = run(&pool, &load, future::pending()).await.unwrap();
        assert_eq!(report.submitted, 20);
        assert_eq!(report.completed + report.failed + report.cancelled, 20);
        assert_eq!(report.cancelled, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_during_graceful_drain_cancels_tasks() {
        let pool = WorkerPool::new(PoolConfig::new(1, 32)).unwrap();
        let mut load = plan(5, 0.0, ShutdownMode::Graceful);
        load.task_duration = Duration::from_secs(30);

        // Fires once the graceful shutdown is already waiting on the tasks
        let interrupt = async {
            while pool.state() != PoolState::Draining {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        let report = tokio::time::timeout(Duration::from_secs(5), run(&pool, &load, interrupt))
            .await
            .expect("interrupt should not wait for running tasks")
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.submitted, 5);
        assert_eq!(report.cancelled, 5);
        assert_eq!(report.stats.state, PoolState::Stopped);
    }

    #[test]
    fn test_synthetic_task_key() {
        let task = synthetic_task(3, Duration::ZERO, false);
        assert_eq!(task.key(), Some("load-3"));
    }
}
