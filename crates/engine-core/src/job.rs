use crate::retry::RetryPolicy;
use model::core::identifiers::{RunId, TableRef};
use serde::Serialize;
use std::{fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Full,
    Incremental,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Full => f.write_str("full"),
            TransferMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// What one run moves. Built once per run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub run_id: RunId,
    pub source_table: TableRef,
    pub target_table: TableRef,
    pub mode: TransferMode,
    pub watermark_column: Option<String>,
    /// Rows with a watermark at or below this value are not moved. Without one an
    /// incremental run covers the last day.
    pub watermark_value: Option<String>,
    pub splitting_enabled: bool,
    pub requested_split_count: u32,
    /// Drop and recreate the target instead of validating it.
    pub drop_target: bool,
    /// Empty an existing target before a full load.
    pub truncate_target: bool,
}

impl TransferJob {
    pub fn is_incremental(&self) -> bool {
        self.mode == TransferMode::Incremental
    }

    /// Number of partitions the splitter is asked for. Splitting disabled means one.
    pub fn effective_split_count(&self) -> u32 {
        if self.splitting_enabled {
            self.requested_split_count
        } else {
            1
        }
    }
}

/// How a run executes. Shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub batch_size: u64,
    pub max_workers: usize,
    pub internal_schema: String,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        TransferSettings {
            batch_size: 10_000,
            max_workers: 4,
            internal_schema: "etl_internal".to_string(),
            retry: RetryPolicy::default(),
            progress_interval: Duration::from_secs(10),
        }
    }
}
