use crate::error::RuntimeError;
use connectors::sql::base::adapter::{SqlAdapter, SqlSession};
use engine_core::{error::TransferError, job::TransferSettings, progress::ProgressTracker};
use engine_processing::{extractor::BatchExtractor, loader::BatchLoader, retry::classify_db_error};
use futures_util::FutureExt;
use model::{
    core::{identifiers::TableRef, value::Value},
    partition::{Partition, PartitionStatus},
    records::batch::Batch,
    schema::TableSchema,
};
use std::{any::Any, cmp::Ordering, collections::VecDeque, panic::AssertUnwindSafe, sync::Arc};
use tokio::{sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a worker reads while processing partitions. Shared, never mutated.
pub struct WorkerContext {
    pub source: Arc<dyn SqlAdapter>,
    pub target: Arc<dyn SqlAdapter>,
    pub schema: Arc<TableSchema>,
    pub order_by: Vec<String>,
    pub target_table: TableRef,
    /// Position of the watermark column in extracted rows.
    pub watermark_index: Option<usize>,
    pub settings: Arc<TransferSettings>,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub enum PartitionResult {
    Succeeded {
        rows: u64,
        high_watermark: Option<Value>,
    },
    /// Rows loaded before the failure stay in the target.
    Failed { rows: u64, error: TransferError },
    /// Never started because the job was stopped.
    Skipped,
}

#[derive(Debug)]
pub struct PartitionOutcome {
    pub partition: Partition,
    pub result: PartitionResult,
}

/// What the pool hands back once every worker has stopped.
#[derive(Debug)]
pub struct PoolRun {
    /// One per reported partition, ordered by ordinal.
    pub outcomes: Vec<PartitionOutcome>,
    /// Workers that ended without reporting.
    pub errors: Vec<RuntimeError>,
}

/// Fixed number of workers draining a queue of pre-divided partitions.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext) -> Self {
        WorkerPool { ctx: Arc::new(ctx) }
    }

    /// Processes every partition. A worker that dies does not stop the others; its
    /// error is returned next to the outcomes the rest produced.
    pub async fn run(&self, partitions: Vec<Partition>) -> PoolRun {
        let workers = self.ctx.settings.max_workers.min(partitions.len()).max(1);
        info!(workers, partitions = partitions.len(), "Launching workers");

        let queue = Arc::new(Mutex::new(VecDeque::from(partitions)));
        let mut set = JoinSet::new();
        for worker in 1..=workers {
            let ctx = self.ctx.clone();
            let queue = queue.clone();
            set.spawn(async move { drain(worker, ctx, queue).await });
        }

        let mut outcomes = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(reported) => outcomes.extend(reported),
                Err(e) => {
                    warn!(error = %e, "Worker task ended abnormally");
                    errors.push(RuntimeError::from(e));
                }
            }
        }
        outcomes.sort_by_key(|o| o.partition.ordinal);
        PoolRun { outcomes, errors }
    }
}

async fn drain(
    worker: usize,
    ctx: Arc<WorkerContext>,
    queue: Arc<Mutex<VecDeque<Partition>>>,
) -> Vec<PartitionOutcome> {
    let mut outcomes = Vec::new();

    loop {
        let Some(mut partition) = queue.lock().await.pop_front() else {
            break;
        };

        if ctx.cancel.is_cancelled() {
            info!(worker, partition = %partition.id, "Stop requested, skipping partition");
            outcomes.push(PartitionOutcome {
                partition,
                result: PartitionResult::Skipped,
            });
            continue;
        }

        partition.status = PartitionStatus::Running;
        info!(
            worker,
            partition = %partition.id,
            estimated_rows = partition.estimated_row_count,
            "Processing partition"
        );

        let result = match AssertUnwindSafe(process(&ctx, &partition))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            // rows loaded before the panic are not known
            Err(panic) => PartitionResult::Failed {
                rows: 0,
                error: TransferError::WorkerPanic(panic_message(panic.as_ref())),
            },
        };
        match &result {
            PartitionResult::Succeeded { rows, .. } => {
                partition.status = PartitionStatus::Succeeded;
                ctx.progress.partition_succeeded();
                info!(worker, partition = %partition.id, rows, "Partition succeeded");
            }
            PartitionResult::Failed { rows, error } => {
                partition.status = PartitionStatus::Failed;
                ctx.progress.partition_failed();
                warn!(
                    worker,
                    partition = %partition.id,
                    rows_loaded = rows,
                    kind = %error.kind(),
                    %error,
                    "Partition failed"
                );
            }
            PartitionResult::Skipped => {}
        }
        outcomes.push(PartitionOutcome { partition, result });
    }

    outcomes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Checks out a session, retrying while the pool or server is busy.
pub(crate) async fn acquire(
    adapter: &dyn SqlAdapter,
    settings: &TransferSettings,
    context: &'static str,
) -> Result<Box<dyn SqlSession>, TransferError> {
    settings
        .retry
        .run(|| adapter.session(), classify_db_error)
        .await
        .into_result()
        .map_err(|e| TransferError::db(context, e))
}

/// Moves one partition batch by batch over the worker's own source and target sessions.
async fn process(ctx: &WorkerContext, partition: &Partition) -> PartitionResult {
    let sessions = tokio::try_join!(
        acquire(ctx.source.as_ref(), &ctx.settings, "acquire source connection"),
        acquire(ctx.target.as_ref(), &ctx.settings, "acquire target connection"),
    );
    let (source, target) = match sessions {
        Ok(pair) => pair,
        Err(error) => return PartitionResult::Failed { rows: 0, error },
    };

    let retry = &ctx.settings.retry;
    let extractor = BatchExtractor::new(
        source.as_ref(),
        &ctx.schema,
        &ctx.order_by,
        ctx.settings.batch_size,
    );
    let loader = BatchLoader::new(target.as_ref(), &ctx.target_table, &ctx.schema.columns);
    let mut stream = extractor.open(partition);

    let mut rows = 0;
    let mut high_watermark = None;

    loop {
        if ctx.cancel.is_cancelled() {
            return PartitionResult::Failed {
                rows,
                error: TransferError::Cancelled,
            };
        }

        let fetched = stream.next_batch(retry).await;
        record_retries(ctx, fetched.attempts());
        let batch = match fetched.into_result() {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(e) => {
                return PartitionResult::Failed {
                    rows,
                    error: TransferError::db("extract batch", e),
                };
            }
        };

        let loaded = loader.load(&batch, retry).await;
        record_retries(ctx, loaded.attempts());
        match loaded.into_result() {
            Ok(written) => {
                rows += written;
                ctx.progress.record_batch(written);
            }
            Err(e) => {
                return PartitionResult::Failed {
                    rows,
                    error: TransferError::db("load batch", e),
                };
            }
        }

        if let Some(index) = ctx.watermark_index {
            track_high_watermark(&mut high_watermark, &batch, index);
        }
    }

    PartitionResult::Succeeded {
        rows,
        high_watermark,
    }
}

fn record_retries(ctx: &WorkerContext, attempts: usize) {
    if attempts > 1 {
        ctx.progress.record_retries(attempts as u64 - 1);
    }
}

pub(crate) fn track_high_watermark(current: &mut Option<Value>, batch: &Batch, index: usize) {
    for row in &batch.rows {
        raise_watermark(current, row.get(index));
    }
}

/// Replaces `current` when `candidate` is a larger non-null value.
pub(crate) fn raise_watermark(current: &mut Option<Value>, candidate: &Value) {
    if candidate.is_null() {
        return;
    }
    let replace = match current {
        None => true,
        Some(seen) => candidate.compare(seen) == Some(Ordering::Greater),
    };
    if replace {
        *current = Some(candidate.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{partition::PartitionId, records::row::Row};

    #[test]
    fn high_watermark_keeps_the_largest_value() {
        let table = TableRef::new("public", "events");
        let batch = Batch {
            partition: PartitionId::new(&table, 1),
            sequence: 1,
            offset: 0,
            rows: vec![
                Row::new(vec![Value::Int(1), Value::BigInt(30)]),
                Row::new(vec![Value::Int(2), Value::Null]),
                Row::new(vec![Value::Int(3), Value::BigInt(45)]),
                Row::new(vec![Value::Int(4), Value::BigInt(12)]),
            ],
        };

        let mut high = Some(Value::BigInt(40));
        track_high_watermark(&mut high, &batch, 1);
        assert_eq!(high, Some(Value::BigInt(45)));

        let mut high = Some(Value::BigInt(99));
        track_high_watermark(&mut high, &batch, 1);
        assert_eq!(high, Some(Value::BigInt(99)));
    }

    #[test]
    fn decimal_watermarks_compare_by_value() {
        let mut high = None;
        for raw in ["9.50", "10.00", "2"] {
            let value = Value::parse(&model::core::data_type::DataType::Numeric, raw).unwrap();
            raise_watermark(&mut high, &value);
        }
        assert_eq!(high.map(|v| v.to_string()), Some("10.00".to_string()));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("disk on fire");
        assert_eq!(panic_message(boxed.as_ref()), "disk on fire");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
