// Workpool runner
//
// Drives a bounded worker pool with synthetic tasks and reports the outcome.
// Pool settings come from WORKPOOL_* environment variables (a .env file is
// loaded if present) and can be overridden on the command line.

mod load;
mod output;
mod telemetry;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use workpool::{PoolConfig, ShutdownMode, SubmitMode, WorkerPool};

use crate::load::LoadPlan;
use crate::output::OutputFormat;
use crate::telemetry::{init_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "workpool-runner")]
#[command(about = "Drive a bounded worker pool with synthetic tasks")]
#[command(version)]
struct Args {
    /// Number of workers
    #[arg(long, env = "WORKPOOL_WORKERS")]
    workers: Option<usize>,

    /// Pending buffer capacity (0 = rendezvous hand-off only)
    #[arg(long, env = "WORKPOOL_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// What submit does when the buffer is full
    #[arg(long, env = "WORKPOOL_SUBMIT_MODE", value_parser = ["block", "reject"])]
    submit_mode: Option<String>,

    /// Number of tasks to submit
    #[arg(long, default_value = "100")]
    tasks: usize,

    /// How long each task runs, in milliseconds
    #[arg(long, default_value = "20")]
    task_ms: u64,

    /// Probability that a task fails (0.0-1.0)
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Cancel outstanding work right after submission instead of letting
    /// queued and running tasks finish
    #[arg(long)]
    immediate: bool,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    output: String,
}

impl Args {
    fn pool_config(&self) -> Result<PoolConfig> {
        let mut config = PoolConfig::from_env().context("invalid WORKPOOL_* environment")?;

        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(mode) = &self.submit_mode {
            let mode: SubmitMode = mode.parse().context("invalid --submit-mode")?;
            config = config.with_submit_mode(mode);
        }

        config.validate().context("invalid pool configuration")?;
        Ok(config)
    }

    fn load_plan(&self) -> Result<LoadPlan> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("--failure-rate must be between 0.0 and 1.0");
        }

        Ok(LoadPlan {
            tasks: self.tasks,
            task_duration: Duration::from_millis(self.task_ms),
            failure_rate: self.failure_rate,
            shutdown: ShutdownMode::from(!self.immediate),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(LoggingConfig::from_env());

    let config = args.pool_config()?;
    let plan = args.load_plan()?;
    let format = OutputFormat::from_str(&args.output);

    tracing::info!(
        pool = %config.name,
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        tasks = plan.tasks,
        "workpool-runner starting"
    );

    let pool = WorkerPool::new(config.clone()).context("failed to start worker pool")?;

    let report = load::run(&pool, &plan, shutdown_signal())
        .await
        .context("load run failed")?;
    output::print_report(format, &config, &report)?;

    tracing::info!("workpool-runner finished");
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(err) => {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            futures::future::pending::<()>().await;
        }
    }
}
