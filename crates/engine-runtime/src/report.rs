use chrono::{DateTime, Utc};
use engine_core::job::TransferMode;
use model::errors::ErrorKind;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// States of one transfer run, in the order they can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Init,
    SchemaSync,
    Split,
    Transferring,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Init => "INIT",
            TransferState::SchemaSync => "SCHEMA_SYNC",
            TransferState::Split => "SPLIT",
            TransferState::Transferring => "TRANSFERRING",
            TransferState::Cleanup => "CLEANUP",
            TransferState::Done => "DONE",
            TransferState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedPartition {
    pub id: String,
    pub ordinal: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub rows_loaded: u64,
}

/// Outcome of a run. Produced for every run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run_id: String,
    pub source_table: String,
    pub target_table: String,
    pub mode: TransferMode,
    pub status: JobStatus,
    pub transitions: Vec<TransferState>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub rows_per_sec: f64,
    /// Rows loaded by partitions that succeeded.
    pub rows_transferred: u64,
    /// Rows already loaded by partitions that later failed.
    pub rows_in_failed_partitions: u64,
    pub partitions_total: usize,
    pub partitions_succeeded: usize,
    pub partitions_skipped: usize,
    pub failed_partitions: Vec<FailedPartition>,
    pub batches_loaded: u64,
    pub retries: u64,
    /// Largest watermark value loaded, to be used as the next run's lower bound.
    pub high_watermark: Option<String>,
    pub target_row_count: Option<i64>,
    /// Job-level failure, when the run stopped before or outside the workers.
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub cleanup_failures: Vec<String>,
    pub cancelled: bool,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Done
    }

    pub fn log_summary(&self) {
        let status = match self.status {
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        };

        info!(
            run_id = %self.run_id,
            status,
            source = %self.source_table,
            target = %self.target_table,
            mode = %self.mode,
            rows_transferred = self.rows_transferred,
            partitions_total = self.partitions_total,
            partitions_succeeded = self.partitions_succeeded,
            partitions_failed = self.failed_partitions.len(),
            partitions_skipped = self.partitions_skipped,
            elapsed_secs = format_args!("{:.2}", self.elapsed_secs),
            rows_per_sec = format_args!("{:.0}", self.rows_per_sec),
            retries = self.retries,
            target_rows = ?self.target_row_count,
            high_watermark = ?self.high_watermark,
            "Transfer finished"
        );

        for failed in &self.failed_partitions {
            warn!(
                partition = %failed.id,
                kind = %failed.kind,
                rows_loaded = failed.rows_loaded,
                "Failed partition: {}",
                failed.message
            );
        }
        if let Some(err) = &self.error {
            error!(kind = ?self.error_kind, "Transfer failed: {err}");
        }
        if !self.cleanup_failures.is_empty() {
            warn!(
                count = self.cleanup_failures.len(),
                "Partition tables may remain in the internal schema"
            );
        }
    }
}
