//! Backpressure, ordering, and concurrency bound tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use workpool::{
    PoolConfig, PoolError, PoolEvent, ShutdownMode, SubmitMode, Task, TaskContext, TaskError,
    WorkerPool,
};

fn gated(gate: Arc<Semaphore>, started: mpsc::UnboundedSender<u32>, value: u32) -> Task<u32> {
    Task::new(move |_ctx: TaskContext| async move {
        let _ = started.send(value);
        let _permit = gate
            .acquire()
            .await
            .map_err(|err| TaskError::new(err.to_string()))?;
        Ok::<_, TaskError>(value)
    })
}

fn instant(value: u32) -> Task<u32> {
    Task::new(move |_ctx: TaskContext| async move { Ok::<_, TaskError>(value) })
}

/// Wait until `count` tasks report they started
async fn started(rx: &mut mpsc::UnboundedReceiver<u32>, count: usize) {
    for _ in 0..count {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("task should start")
            .expect("sender alive");
    }
}

// ============================================
// Blocking submission
// ============================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_one_slot_four_tasks() {
    let pool = WorkerPool::new(PoolConfig::new(2, 1)).unwrap();

    let sleeper = |key: &'static str| {
        Task::new(move |_ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, TaskError>(key.to_string())
        })
        .with_key(key)
    };

    let begin = Instant::now();
    let a = pool.submit(sleeper("A")).await.unwrap();
    let b = pool.submit(sleeper("B")).await.unwrap();
    let c = pool.submit(sleeper("C")).await.unwrap();

    let before_d = Instant::now();
    let d = pool.submit(sleeper("D")).await.unwrap();
    // D can only be accepted once a worker finished A or B and took C
    assert!(before_d.elapsed() >= Duration::from_millis(50));
    assert!(begin.elapsed() >= Duration::from_millis(50));

    let mut completed = Vec::new();
    for handle in [a, b, c, d] {
        assert!(handle.id().key().is_some());
        completed.push(handle.wait().await.unwrap());
    }

    let unique: HashSet<String> = completed.iter().cloned().collect();
    let expected: HashSet<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
    assert_eq!(completed.len(), 4);
    assert_eq!(unique, expected);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
    assert_eq!(pool.stats().completed, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocked_submitter_resumes_when_slot_frees() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::new(1, 1)).unwrap());
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let first = pool
        .submit(gated(Arc::clone(&gate), started_tx.clone(), 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;
    let second = pool.submit(instant(2)).await.unwrap();

    let blocked = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.submit(instant(3)).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!blocked.is_finished());
    assert_eq!(pool.stats().pending, 1);

    gate.add_permits(1);
    let third = tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(first.wait().await.unwrap(), 1);
    assert_eq!(second.wait().await.unwrap(), 2);
    assert_eq!(third.wait().await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocked_submitter_sees_closed_on_shutdown() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::new(1, 0)).unwrap());
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let _running = pool
        .submit(gated(Arc::clone(&gate), started_tx, 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;

    let blocked = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.submit(instant(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let shutdown = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.shutdown(ShutdownMode::Graceful).await })
    };

    let result = tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(PoolError::Closed)));

    gate.add_permits(1);
    shutdown.await.unwrap().unwrap();
}

// ============================================
// Non-blocking submission
// ============================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_try_submit_rejects_when_full() {
    let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let _running = pool
        .submit(gated(Arc::clone(&gate), started_tx, 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;

    let _queued = pool.try_submit(instant(2)).unwrap();
    let result = pool.try_submit(instant(3));
    assert!(matches!(result, Err(PoolError::QueueFull { capacity: 1 })));
    assert!(result.unwrap_err().is_retryable());

    let stats = pool.stats();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.active, 1);

    gate.add_permits(1);
    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
    assert_eq!(pool.stats().completed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reject_mode_submit_fails_fast() {
    let pool = WorkerPool::new(PoolConfig::new(1, 1).with_submit_mode(SubmitMode::Reject)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let _running = pool
        .submit(gated(Arc::clone(&gate), started_tx, 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;
    let _queued = pool.submit(instant(2)).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pool.submit(instant(3)))
        .await
        .expect("reject mode must not block");
    assert!(matches!(result, Err(PoolError::QueueFull { capacity: 1 })));

    gate.add_permits(1);
    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_timeout() {
    let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let _running = pool
        .submit(gated(Arc::clone(&gate), started_tx, 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;
    let _queued = pool.submit(instant(2)).await.unwrap();

    let limit = Duration::from_millis(30);
    let begin = Instant::now();
    let result = pool.submit_timeout(instant(3), limit).await;
    assert!(matches!(result, Err(PoolError::Timeout { limit: l }) if l == limit));
    assert!(begin.elapsed() >= limit);
    // The timed-out task left no trace in the buffer
    assert_eq!(pool.stats().pending, 1);

    gate.add_permits(1);
    let handle = pool
        .submit_timeout(instant(4), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(handle.wait().await.unwrap(), 4);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
    assert_eq!(pool.stats().completed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_timeout_with_unrepresentable_deadline() {
    let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();

    let handle = pool
        .submit_timeout(instant(7), Duration::MAX)
        .await
        .unwrap();
    assert_eq!(handle.wait().await.unwrap(), 7);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

// ============================================
// Rendezvous (C = 0)
// ============================================

#[tokio::test]
async fn test_fresh_rendezvous_pool_accepts_one_task_per_worker() {
    let pool = WorkerPool::new(PoolConfig::new(2, 0)).unwrap();

    // Every worker counts as idle from construction on
    let first = pool.try_submit(instant(1)).unwrap();
    let second = pool.try_submit(instant(2)).unwrap();
    let result = pool.try_submit(instant(3));
    assert!(matches!(result, Err(PoolError::QueueFull { capacity: 0 })));

    assert_eq!(first.wait().await.unwrap(), 1);
    assert_eq!(second.wait().await.unwrap(), 2);
    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test]
async fn test_fresh_rendezvous_pool_in_reject_mode() {
    let pool =
        WorkerPool::new(PoolConfig::new(1, 0).with_submit_mode(SubmitMode::Reject)).unwrap();

    let handle = pool.submit(instant(5)).await.unwrap();
    assert_eq!(handle.wait().await.unwrap(), 5);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
    assert_eq!(pool.stats().completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rendezvous_hand_off() {
    let pool = WorkerPool::new(PoolConfig::new(1, 0)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    // The worker is idle, so the task is handed over directly
    let running = pool
        .submit(gated(Arc::clone(&gate), started_tx, 1))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;

    // No idle worker and no buffer
    let result = pool.try_submit(instant(2));
    assert!(matches!(result, Err(PoolError::QueueFull { capacity: 0 })));
    assert_eq!(pool.stats().pending, 0);

    let result = pool
        .submit_timeout(instant(3), Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(PoolError::Timeout { .. })));

    gate.add_permits(1);
    assert_eq!(running.wait().await.unwrap(), 1);

    let handle = pool.submit(instant(4)).await.unwrap();
    assert_eq!(handle.wait().await.unwrap(), 4);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
    assert_eq!(pool.stats().pending, 0);
}

// ============================================
// Bounds and ordering
// ============================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrency_and_buffer_bounds() {
    const WORKERS: usize = 3;
    const CAPACITY: usize = 4;

    let max_depth = Arc::new(AtomicUsize::new(0));
    let depth_sink = Arc::clone(&max_depth);
    let pool = WorkerPool::builder(PoolConfig::new(WORKERS, CAPACITY))
        .observer(move |event: &PoolEvent| {
            if let PoolEvent::TaskQueued { depth, .. } = event {
                depth_sink.fetch_max(*depth, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for value in 0..30u32 {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        tasks.push(Task::new(move |_ctx: TaskContext| async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, TaskError>(value)
        }));
    }

    let batch = pool.submit_all(tasks).await.unwrap();
    let results = batch.collect_ordered().await;
    assert!(results.iter().all(|result| result.is_ok()));

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= WORKERS, "peak concurrency {peak} exceeded {WORKERS}");
    assert!(max_depth.load(Ordering::SeqCst) <= CAPACITY);

    pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_runs_fifo() {
    let pool = WorkerPool::new(PoolConfig::new(1, 16)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let order = Arc::new(Mutex::new(Vec::new()));

    let _first = pool
        .submit(gated(Arc::clone(&gate), started_tx, 0))
        .await
        .unwrap();
    started(&mut started_rx, 1).await;

    let mut handles = Vec::new();
    for value in 1..=10u32 {
        let order = Arc::clone(&order);
        let handle = pool
            .submit(Task::new(move |_ctx: TaskContext| async move {
                order.lock().push(value);
                Ok::<_, TaskError>(value)
            }))
            .await
            .unwrap();
        assert_eq!(handle.id().seq(), value as u64);
        handles.push(handle);
    }

    gate.add_permits(1);
    pool.shutdown(ShutdownMode::Graceful).await.unwrap();

    assert_eq!(*order.lock(), (1..=10).collect::<Vec<u32>>());
}
