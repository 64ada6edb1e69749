//! Tracing setup and per-batch reports.

use std::path::Path;

use chrono::{DateTime, Utc};
use feed_coordination::production::BatchSummary;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const REPORT_FILE: &str = ".feedme-batch.json";
pub const TELEMETRY_FILE: &str = ".feedme-telemetry.jsonl";

/// Install the global fmt subscriber, honouring `RUST_LOG`.
///
/// Logs go to stderr so `post` can stream progress on stdout.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// One batch's outcome with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub timestamp: DateTime<Utc>,
    pub requested: usize,
    pub elapsed_secs: f64,
    pub approval_rate: f64,
    pub average_rating: f64,
    pub average_time_secs: f64,
    #[serde(flatten)]
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn new(summary: &BatchSummary, requested: usize, elapsed_secs: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            requested,
            elapsed_secs,
            approval_rate: summary.approval_rate(),
            average_rating: summary.average_rating(),
            average_time_secs: summary.average_time(),
            summary: summary.clone(),
        }
    }
}

/// Write the latest batch report to `.feedme-batch.json` under `root`.
pub fn write_batch_report(report: &BatchReport, root: &Path) {
    let path = root.join(REPORT_FILE);
    match serde_json::to_string_pretty(report) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote batch report"),
            Err(e) => warn!("Failed to write batch report: {e}"),
        },
        Err(e) => warn!("Failed to serialize batch report: {e}"),
    }
}

/// Append the report as one JSON line to `.feedme-telemetry.jsonl`.
pub fn append_telemetry(report: &BatchReport, root: &Path) {
    let path = root.join(TELEMETRY_FILE);
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended batch telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
