use crate::{
    report::{FailedPartition, JobReport, JobStatus, TransferState},
    workers::{PartitionOutcome, PartitionResult, WorkerContext, WorkerPool, acquire, raise_watermark},
};
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use connectors::sql::base::adapter::SqlSession;
use engine_core::{
    connections::ConnectionManager,
    error::TransferError,
    job::{TransferJob, TransferSettings},
    progress::ProgressTracker,
};
use engine_processing::{
    retry::classify_db_error,
    schema::{ReplicateOutcome, SchemaInspector},
    splitter::{SplitOutcome, Splitter},
};
use model::{
    core::{data_type::DataType, identifiers::TableRef, value::Value},
    errors::ErrorKind,
    filter::RowFilter,
    partition::{Partition, PartitionStatus},
    schema::TableSchema,
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs one transfer job through INIT, SCHEMA_SYNC, SPLIT, TRANSFERRING and CLEANUP.
pub struct TransferOrchestrator {
    connections: ConnectionManager,
    job: Arc<TransferJob>,
    settings: Arc<TransferSettings>,
    cancel: CancellationToken,
    /// Calendar day the last-day window of an incremental run without a watermark
    /// value is measured from.
    today: NaiveDate,
}

/// What SCHEMA_SYNC hands to the later stages.
struct Prepared {
    schema: Arc<TableSchema>,
    filter: Option<RowFilter>,
}

struct RunState {
    transitions: Vec<TransferState>,
    progress: ProgressTracker,
    started_at: DateTime<Utc>,
    partitions_total: usize,
    outcomes: Vec<PartitionOutcome>,
    error: Option<(ErrorKind, String)>,
    cleanup_failures: Vec<String>,
    target_row_count: Option<i64>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            transitions: Vec::new(),
            progress: ProgressTracker::new(),
            started_at: Utc::now(),
            partitions_total: 0,
            outcomes: Vec::new(),
            error: None,
            cleanup_failures: Vec::new(),
            target_row_count: None,
        }
    }

    fn enter(&mut self, state: TransferState) {
        info!(%state, "Entering state");
        self.transitions.push(state);
    }

    fn fail(&mut self, err: &TransferError) {
        error!(kind = %err.kind(), error = %err, "Transfer aborted");
        self.error = Some((err.kind(), err.to_string()));
    }
}

impl TransferOrchestrator {
    pub fn new(
        connections: ConnectionManager,
        job: TransferJob,
        settings: TransferSettings,
        cancel: CancellationToken,
    ) -> Self {
        TransferOrchestrator {
            connections,
            job: Arc::new(job),
            settings: Arc::new(settings),
            cancel,
            today: Local::now().date_naive(),
        }
    }

    /// Measures the last-day window from `today` instead of the local date.
    pub fn on_day(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn job(&self) -> &TransferJob {
        &self.job
    }

    /// Always produces a report. Failures are recorded in it, never returned.
    pub async fn run(&self) -> JobReport {
        let mut run = RunState::new();
        run.enter(TransferState::Init);
        info!(
            run_id = %self.job.run_id,
            source = %self.job.source_table,
            target = %self.job.target_table,
            mode = %self.job.mode,
            splits = self.job.effective_split_count(),
            workers = self.settings.max_workers,
            "Starting transfer"
        );

        if let Err(e) = self.connections.validate(self.settings.max_workers).await {
            run.fail(&e);
            return self.finish(run);
        }

        run.enter(TransferState::SchemaSync);
        let prepared = match self.sync_schema().await {
            Ok(prepared) => prepared,
            Err(e) => {
                run.fail(&e);
                return self.finish(run);
            }
        };

        let mut artifacts = Vec::new();
        if self.cancel.is_cancelled() {
            run.fail(&TransferError::Cancelled);
        } else {
            match self.split(&mut run, &prepared).await {
                Ok(split) => {
                    artifacts = split
                        .partitions
                        .iter()
                        .filter_map(|p| p.artifact().cloned())
                        .collect();
                    self.transfer(&mut run, &prepared, split).await;
                }
                Err(e) => run.fail(&e),
            }
        }

        self.cleanup(&mut run, &artifacts).await;

        match self
            .connections
            .target
            .get_row_count(&self.job.target_table)
            .await
        {
            Ok(count) => run.target_row_count = Some(count),
            Err(e) => warn!(target = %self.job.target_table, error = %e, "Could not count target rows"),
        }

        self.finish(run)
    }

    async fn sync_schema(&self) -> Result<Prepared, TransferError> {
        let source = self.source_session().await?;
        let target = acquire(
            self.connections.target.as_ref(),
            &self.settings,
            "acquire target connection",
        )
        .await?;
        let inspector = SchemaInspector::new(self.settings.retry.clone());

        inspector
            .ensure_schema(target.as_ref(), &self.job.target_table.schema)
            .await?;
        inspector
            .ensure_schema(source.as_ref(), &self.settings.internal_schema)
            .await?;

        let schema = inspector
            .inspect(source.as_ref(), &self.job.source_table)
            .await?;
        let outcome = inspector
            .replicate(
                target.as_ref(),
                &schema,
                &self.job.target_table,
                self.job.drop_target,
            )
            .await?;

        if outcome == ReplicateOutcome::Validated
            && !self.job.is_incremental()
            && self.job.truncate_target
        {
            inspector
                .truncate(target.as_ref(), &self.job.target_table)
                .await?;
        }

        let filter = self.watermark_filter(&schema)?;
        Ok(Prepared {
            schema: Arc::new(schema),
            filter,
        })
    }

    /// Incremental runs read rows newer than the watermark, or from the start of
    /// yesterday when no watermark value is known. The bound is fixed here, once, so
    /// every count, partition and page of the run selects the same rows.
    fn watermark_filter(&self, schema: &TableSchema) -> Result<Option<RowFilter>, TransferError> {
        if !self.job.is_incremental() {
            return Ok(None);
        }

        let column = self.job.watermark_column.as_deref().ok_or_else(|| {
            TransferError::Schema("incremental run without a watermark column".to_string())
        })?;
        let definition = schema.column(column).ok_or_else(|| {
            TransferError::Schema(format!(
                "watermark column '{column}' does not exist in {}",
                schema.table
            ))
        })?;
        if !definition.data_type.has_client_order() {
            return Err(TransferError::Schema(format!(
                "watermark column '{column}' has type {}, which cannot be tracked as a watermark",
                definition.type_name
            )));
        }

        let filter = match self.job.watermark_value.as_deref() {
            Some(value) => {
                Value::parse(&definition.data_type, value).map_err(|e| {
                    TransferError::Schema(format!("invalid watermark value '{value}': {e}"))
                })?;
                RowFilter::after(column, definition.data_type.clone(), value)
            }
            None => {
                let since = last_day_start(&definition.data_type, self.today).ok_or_else(|| {
                    TransferError::Schema(format!(
                        "watermark column '{column}' of type {} needs a watermark value",
                        definition.type_name
                    ))
                })?;
                info!(column, %since, "No watermark value, reading the last day");
                RowFilter::since(column, definition.data_type.clone(), &since)
            }
        };
        Ok(Some(filter))
    }

    async fn split(
        &self,
        run: &mut RunState,
        prepared: &Prepared,
    ) -> Result<SplitOutcome, TransferError> {
        let session = self.source_session().await?;
        let splitter = Splitter::new(
            self.settings.retry.clone(),
            self.settings.internal_schema.clone(),
        );
        let table = &self.job.source_table;
        let filter = prepared.filter.as_ref();

        let total_rows = splitter.count_rows(session.as_ref(), table, filter).await?;
        let n = self.job.effective_split_count();
        if Splitter::will_split(total_rows, n) {
            run.enter(TransferState::Split);
        }

        Ok(splitter
            .split_rows(session.as_ref(), table, &prepared.schema, filter, total_rows, n)
            .await)
    }

    async fn transfer(&self, run: &mut RunState, prepared: &Prepared, split: SplitOutcome) {
        let SplitOutcome {
            total_rows,
            partitions,
            mut creation_errors,
        } = split;

        run.partitions_total = partitions.len();
        run.progress.set_plan(partitions.len() as u64, total_rows);

        let (pending, failed): (Vec<Partition>, Vec<Partition>) = partitions
            .into_iter()
            .partition(|p| p.status == PartitionStatus::Pending);
        for partition in failed {
            let error = match creation_errors.iter().position(|(id, _)| *id == partition.id) {
                Some(idx) => creation_errors.swap_remove(idx).1,
                None => TransferError::Schema(format!(
                    "partition {} was not created",
                    partition.id
                )),
            };
            run.progress.partition_failed();
            run.outcomes.push(PartitionOutcome {
                partition,
                result: PartitionResult::Failed { rows: 0, error },
            });
        }

        run.enter(TransferState::Transferring);
        let watermark_index = self
            .job
            .watermark_column
            .as_deref()
            .and_then(|column| prepared.schema.column_index(column));

        let pool = WorkerPool::new(WorkerContext {
            source: self.connections.source.clone(),
            target: self.connections.target.clone(),
            schema: prepared.schema.clone(),
            order_by: prepared.schema.order_key(),
            target_table: self.job.target_table.clone(),
            watermark_index,
            settings: self.settings.clone(),
            progress: run.progress.clone(),
            cancel: self.cancel.clone(),
        });

        let stop_reporter = CancellationToken::new();
        let reporter = spawn_reporter(
            run.progress.clone(),
            self.settings.progress_interval,
            stop_reporter.clone(),
        );

        let pooled = pool.run(pending).await;
        run.outcomes.extend(pooled.outcomes);
        if !pooled.errors.is_empty() {
            let message = pooled
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            error!(error = %message, "Workers ended abnormally");
            run.error = Some((ErrorKind::Other, message));
        }
        run.outcomes.sort_by_key(|o| o.partition.ordinal);

        stop_reporter.cancel();
        if let Err(e) = reporter.await {
            warn!(error = %e, "Progress reporter stopped abnormally");
        }
        info!(progress = %run.progress.snapshot(), "Workers finished");
    }

    /// Best-effort removal of partition tables. Failures are logged and recorded but
    /// never change the outcome of the job.
    async fn cleanup(&self, run: &mut RunState, artifacts: &[TableRef]) {
        run.enter(TransferState::Cleanup);

        let session = match self.source_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Cleanup could not connect to the source");
                run.cleanup_failures.push(format!("cleanup connection: {e}"));
                return;
            }
        };

        let mut attempted = HashSet::new();
        for table in artifacts {
            attempted.insert(table.name.clone());
            self.drop_artifact(session.as_ref(), table, run).await;
        }

        let internal = &self.settings.internal_schema;
        let listed = self
            .settings
            .retry
            .run(|| session.list_tables(internal), classify_db_error)
            .await
            .into_result();
        match listed {
            Ok(names) => {
                for name in names {
                    if attempted.contains(&name)
                        || self.job.source_table.partition_ordinal(&name).is_none()
                    {
                        continue;
                    }
                    let stale = TableRef::new(internal.as_str(), name);
                    warn!(table = %stale, "Dropping stale partition table");
                    self.drop_artifact(session.as_ref(), &stale, run).await;
                }
            }
            Err(e) => {
                error!(schema = %internal, error = %e, "Failed to list partition tables");
                run.cleanup_failures
                    .push(format!("list tables in {internal}: {e}"));
            }
        }

        if run.cleanup_failures.is_empty() {
            info!(dropped = artifacts.len(), "Cleanup finished");
        }
    }

    async fn drop_artifact(&self, session: &dyn SqlSession, table: &TableRef, run: &mut RunState) {
        let dropped = self
            .settings
            .retry
            .run(|| session.drop_table(table), classify_db_error)
            .await
            .into_result();
        if let Err(e) = dropped {
            error!(%table, error = %e, "Failed to drop partition table");
            run.cleanup_failures.push(format!("{table}: {e}"));
        }
    }

    async fn source_session(&self) -> Result<Box<dyn SqlSession>, TransferError> {
        acquire(
            self.connections.source.as_ref(),
            &self.settings,
            "acquire source connection",
        )
        .await
    }

    fn finish(&self, mut run: RunState) -> JobReport {
        let mut rows_transferred = 0;
        let mut rows_in_failed_partitions = 0;
        let mut partitions_succeeded = 0;
        let mut partitions_skipped = 0;
        let mut failed_partitions = Vec::new();
        let mut high_watermark: Option<Value> = None;

        for outcome in &run.outcomes {
            match &outcome.result {
                PartitionResult::Succeeded {
                    rows,
                    high_watermark: partition_high,
                } => {
                    partitions_succeeded += 1;
                    rows_transferred += rows;
                    if let Some(value) = partition_high {
                        raise_watermark(&mut high_watermark, value);
                    }
                }
                PartitionResult::Failed { rows, error } => {
                    rows_in_failed_partitions += rows;
                    failed_partitions.push(FailedPartition {
                        id: outcome.partition.id.to_string(),
                        ordinal: outcome.partition.ordinal,
                        kind: error.kind(),
                        message: error.to_string(),
                        rows_loaded: *rows,
                    });
                }
                PartitionResult::Skipped => partitions_skipped += 1,
            }
        }

        let done = run.error.is_none()
            && run.partitions_total > 0
            && partitions_succeeded == run.partitions_total;
        let status = if done {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        run.enter(if done {
            TransferState::Done
        } else {
            TransferState::Failed
        });

        let snapshot = run.progress.snapshot();
        let elapsed_secs = snapshot.elapsed.as_secs_f64();
        let (error_kind, error) = match run.error {
            Some((kind, message)) => (Some(kind), Some(message)),
            None => (None, None),
        };

        let report = JobReport {
            run_id: self.job.run_id.to_string(),
            source_table: self.job.source_table.to_string(),
            target_table: self.job.target_table.to_string(),
            mode: self.job.mode,
            status,
            transitions: run.transitions,
            started_at: run.started_at,
            elapsed_secs,
            rows_per_sec: if elapsed_secs > 0.0 {
                rows_transferred as f64 / elapsed_secs
            } else {
                0.0
            },
            rows_transferred,
            rows_in_failed_partitions,
            partitions_total: run.partitions_total,
            partitions_succeeded,
            partitions_skipped,
            failed_partitions,
            batches_loaded: snapshot.batches_loaded,
            retries: snapshot.retries,
            high_watermark: high_watermark.map(|v| v.to_string()),
            target_row_count: run.target_row_count,
            error,
            error_kind,
            cleanup_failures: run.cleanup_failures,
            cancelled: self.cancel.is_cancelled(),
        };
        report.log_summary();
        report
    }
}

fn spawn_reporter(
    progress: ProgressTracker,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => info!(progress = %progress.snapshot(), "Transfer progress"),
            }
        }
    })
}

/// Start of the day before `today` as a literal of the watermark column's type. Only
/// date and timestamp columns have a last day.
fn last_day_start(data_type: &DataType, today: NaiveDate) -> Option<String> {
    match data_type {
        DataType::Date | DataType::Timestamp | DataType::TimestampTz => today
            .checked_sub_days(Days::new(1))
            .map(|day| day.format("%Y-%m-%d").to_string()),
        _ => None,
    }
}
