use crate::memory::MemoryStore;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use engine_core::{
    connections::ConnectionManager,
    job::{TransferJob, TransferMode, TransferSettings},
    retry::RetryPolicy,
};
use engine_runtime::{orchestrator::TransferOrchestrator, report::JobReport};
use model::{
    core::{
        data_type::DataType,
        identifiers::{RunId, TableRef},
        value::Value,
    },
    records::row::Row,
    schema::{ColumnDefinition, TableSchema},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const INTERNAL_SCHEMA: &str = "etl_internal";

pub fn source_table() -> TableRef {
    TableRef::new("public", "orders")
}

pub fn target_table() -> TableRef {
    TableRef::new("ETL", "orders")
}

pub fn orders_schema(table: TableRef) -> TableSchema {
    TableSchema {
        table,
        columns: vec![
            ColumnDefinition::new("id", "bigint", false),
            ColumnDefinition::new("customer", "character varying(40)", true),
            ColumnDefinition::new("amount", "numeric(12,2)", true),
            ColumnDefinition::new("updated_at", "timestamp without time zone", false),
        ],
        primary_key: vec!["id".to_string()],
        approx_row_count: 0,
    }
}

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

pub fn order_row(id: i64, updated_at: NaiveDateTime) -> Row {
    Row::new(vec![
        Value::BigInt(id),
        Value::Text(format!("customer-{}", id % 17)),
        amount(&format!("{}.{:02}", id * 3, id % 100)),
        Value::Timestamp(updated_at),
    ])
}

pub fn amount(raw: &str) -> Value {
    Value::parse(&DataType::Numeric, raw).unwrap()
}

/// `count` orders with ids `1..=count`, each updated one minute after the previous one.
/// Stored newest first so reads have to order them.
pub fn seed_orders(store: &MemoryStore, count: i64) {
    let rows = (1..=count)
        .rev()
        .map(|id| order_row(id, base_time() + TimeDelta::minutes(id)))
        .collect();
    store.create(orders_schema(source_table()), rows);
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|row| match row.get(0) {
            Value::BigInt(id) => *id,
            other => panic!("unexpected id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids
}

pub fn full_job(splits: Option<u32>) -> TransferJob {
    TransferJob {
        run_id: RunId::new("run-test"),
        source_table: source_table(),
        target_table: target_table(),
        mode: TransferMode::Full,
        watermark_column: None,
        watermark_value: None,
        splitting_enabled: splits.is_some(),
        requested_split_count: splits.unwrap_or(10),
        drop_target: false,
        truncate_target: true,
    }
}

pub fn incremental_job(column: &str, value: Option<&str>, splits: Option<u32>) -> TransferJob {
    TransferJob {
        mode: TransferMode::Incremental,
        watermark_column: Some(column.to_string()),
        watermark_value: value.map(str::to_string),
        ..full_job(splits)
    }
}

pub fn settings(max_workers: usize, batch_size: u64) -> TransferSettings {
    TransferSettings {
        batch_size,
        max_workers,
        internal_schema: INTERNAL_SCHEMA.to_string(),
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
        progress_interval: Duration::from_millis(50),
    }
}

/// A source and a target store with pools sized to the worker count.
pub struct Harness {
    pub source: MemoryStore,
    pub target: MemoryStore,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(pool_size: usize) -> Self {
        Harness {
            source: MemoryStore::new("source", pool_size),
            target: MemoryStore::new("target", pool_size),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_orders(pool_size: usize, count: i64) -> Self {
        let harness = Harness::new(pool_size);
        seed_orders(&harness.source, count);
        harness
    }

    pub fn orchestrator(&self, job: TransferJob, settings: TransferSettings) -> TransferOrchestrator {
        TransferOrchestrator::new(
            ConnectionManager::new(self.source.adapter(), self.target.adapter()),
            job,
            settings,
            self.cancel.clone(),
        )
    }

    pub async fn run(&self, job: TransferJob, settings: TransferSettings) -> JobReport {
        self.orchestrator(job, settings).run().await
    }

    pub fn target_ids(&self) -> Vec<i64> {
        ids(&self.target.rows(&target_table()).unwrap_or_default())
    }

    pub fn leftover_partitions(&self) -> Vec<String> {
        self.source.tables_in(INTERNAL_SCHEMA)
    }
}
