//! # Bounded Worker Pool
//!
//! An async task-execution pool that caps both concurrency and queueing.
//!
//! ## Features
//!
//! - **Bounded concurrency**: never more than W tasks run at once
//! - **Backpressure**: a FIFO pending buffer of capacity C that blocks or rejects submitters when full
//! - **Rendezvous mode**: with C = 0 a task is accepted only when an idle worker takes it directly
//! - **Cooperative cancellation**: pending tasks are dequeued, running tasks observe a token
//! - **Graceful and immediate shutdown**: no accepted task is silently dropped
//! - **Worker replacement**: a faulted worker is replaced with backoff, keeping W workers alive
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 submit / try_submit / submit_all             │
//! │      (blocks on Notify or rejects while the buffer is full) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PendingQueue                            │
//! │  (FIFO buffer of C tasks, idle-worker hand-off, lifecycle)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Supervisor + W Workers                      │
//! │  (run tasks, catch panics, reply to handles, replace faults)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use workpool::prelude::*;
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> Result<(), PoolError> {
//! let pool = WorkerPool::new(PoolConfig::new(4, 16).with_name("thumbnails"))?;
//!
//! let batch = pool
//!     .submit_all((1..=8u64).map(|n| {
//!         Task::new(move |ctx: TaskContext| async move {
//!             ctx.checkpoint()?;
//!             Ok::<_, TaskError>(n * n)
//!         })
//!     }))
//!     .await?;
//!
//! let squares: Vec<u64> = batch
//!     .collect_ordered()
//!     .await
//!     .into_iter()
//!     .collect::<Result<_, _>>()?;
//! assert_eq!(squares, vec![1, 4, 9, 16, 25, 36, 49, 64]);
//!
//! pool.shutdown(ShutdownMode::Graceful).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod pool;
pub mod restart;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::batch::Batch;
    pub use crate::config::{PoolConfig, SubmitMode};
    pub use crate::error::PoolError;
    pub use crate::events::{PoolEvent, PoolObserver};
    pub use crate::pool::{PoolState, PoolStats, ShutdownMode, WorkerPool};
    pub use crate::task::{Task, TaskContext, TaskError, TaskHandle, TaskOutcome, TaskResult};
}

// Re-export key types at crate root
pub use batch::Batch;
pub use config::{PoolConfig, SubmitMode};
pub use error::{PoolError, WorkerFault};
pub use events::{PoolEvent, PoolObserver};
pub use pool::{PoolBuilder, PoolState, PoolStats, ShutdownMode, WorkerPool};
pub use restart::RestartPolicy;
pub use task::{
    CancelOutcome, FailureKind, Task, TaskContext, TaskError, TaskHandle, TaskId, TaskOutcome,
    TaskResult, TaskStatus,
};
