// Output formatting for the runner

use anyhow::{Context, Result};
use serde::Serialize;

use workpool::{PoolConfig, PoolStats};

use crate::load::LoadReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        if let OutputFormat::Json = self {
            let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
            println!("{json}");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    config: &'a PoolConfig,
    report: &'a LoadReport,
}

/// Print a simple key-value pair for text output
fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{:<18} {}", format!("{}:", label), value);
}

pub fn print_report(format: OutputFormat, config: &PoolConfig, report: &LoadReport) -> Result<()> {
    match format {
        OutputFormat::Json => format.print_value(&RunSummary { config, report }),
        OutputFormat::Text => {
            print_field("Pool", &config.name);
            print_field("Workers", config.worker_count);
            print_field("Queue capacity", config.queue_capacity);
            print_field("Submit mode", config.submit_mode);
            print_field("Submitted", report.submitted);
            print_field("Rejected", report.rejected);
            print_field("Completed", report.completed);
            print_field("Failed", report.failed);
            print_field("Cancelled", report.cancelled);
            if report.interrupted {
                print_field("Interrupted", "yes");
            }
            print_field("Elapsed", format!("{} ms", report.elapsed_ms));
            print_stats(&report.stats);
            Ok(())
        }
    }
}

fn print_stats(stats: &PoolStats) {
    print_field("State", stats.state);
    print_field("Live workers", stats.live_workers);
    print_field("Workers replaced", stats.workers_replaced);
}
