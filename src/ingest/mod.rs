pub mod loader;

use serde::Serialize;

use crate::query::period::Granularity;

/// Options controlling an ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Grain of the periods in the file. Date cells are snapped to it.
    pub granularity: Granularity,
    /// Replace existing rows for every (clinic, period) pair in the file
    /// instead of appending next to them.
    pub replace: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            granularity: Granularity::Month,
            replace: true,
        }
    }
}

/// Report returned after an ingest run completes.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Option<i64>,
    pub source: String,
    pub status: IngestStatus,
    pub rows_read: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
    pub rows_replaced: u64,
    pub new_companies: u64,
    pub error: Option<String>,
}

impl IngestReport {
    /// Create a report with the status derived from counts.
    pub fn from_counts(source: String, rows_read: u64, rows_loaded: u64, rows_rejected: u64) -> Self {
        let status = if rows_rejected == 0 {
            IngestStatus::Success
        } else if rows_loaded > 0 {
            IngestStatus::PartialFailure
        } else {
            IngestStatus::Failed
        };
        let error = if rows_rejected > 0 {
            Some(format!("{rows_rejected} rows rejected"))
        } else {
            None
        };
        Self {
            run_id: None,
            source,
            status,
            rows_read,
            rows_loaded,
            rows_rejected,
            rows_replaced: 0,
            new_companies: 0,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    PartialFailure,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Success => "success",
            IngestStatus::PartialFailure => "partial_failure",
            IngestStatus::Failed => "failed",
        }
    }
}

/// Callbacks for reporting ingest progress. Every method has a no-op default.
pub trait IngestProgress: Send + Sync {
    fn on_file_start(&self, _source: &str) {}
    fn on_row_rejected(&self, _source: &str, _line: u64, _message: &str) {}
    fn on_rows_parsed(&self, _source: &str, _accepted: usize, _rejected: usize) {}
    fn on_complete(&self, _report: &IngestReport) {}
}

/// Progress reporter that does nothing.
pub struct NoopProgress;

impl IngestProgress for NoopProgress {}
