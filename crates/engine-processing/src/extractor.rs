use crate::retry::classify_db_error;
use connectors::sql::base::{adapter::SqlSession, error::DbError, requests::FetchRequest};
use engine_core::retry::{AttemptOutcome, RetryPolicy};
use model::{
    core::value::Value, partition::Partition, records::batch::Batch, schema::TableSchema,
};
use tracing::debug;

/// Reads partitions as ordered, bounded batches over one held source session.
pub struct BatchExtractor<'a> {
    session: &'a dyn SqlSession,
    schema: &'a TableSchema,
    order_by: &'a [String],
    batch_size: u64,
    /// Row positions of the order key when it is the primary key. Pages then seek past
    /// the last key read instead of skipping an offset.
    seek_key: Option<Vec<usize>>,
}

impl<'a> BatchExtractor<'a> {
    pub fn new(
        session: &'a dyn SqlSession,
        schema: &'a TableSchema,
        order_by: &'a [String],
        batch_size: u64,
    ) -> Self {
        let by_primary_key = schema.has_primary_key() && order_by == schema.primary_key.as_slice();
        let seek_key: Option<Vec<usize>> = if by_primary_key {
            order_by.iter().map(|c| schema.column_index(c)).collect()
        } else {
            None
        };

        BatchExtractor {
            session,
            schema,
            order_by,
            batch_size: batch_size.max(1),
            seek_key,
        }
    }

    /// Starts reading `partition` from its first row.
    pub fn open(&self, partition: &'a Partition) -> BatchStream<'_> {
        BatchStream {
            extractor: self,
            partition,
            next_offset: 0,
            last_key: None,
            sequence: 0,
            state: StreamState::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Exhausted,
    Invalidated,
}

/// Finite and not restartable. A failed read invalidates the stream; the partition has to
/// be reopened from the start.
pub struct BatchStream<'a> {
    extractor: &'a BatchExtractor<'a>,
    partition: &'a Partition,
    next_offset: u64,
    last_key: Option<Vec<Value>>,
    sequence: u64,
    state: StreamState,
}

impl BatchStream<'_> {
    /// Reads the next batch. `None` once every row of the partition has been returned.
    pub async fn next_batch(&mut self, retry: &RetryPolicy) -> AttemptOutcome<Option<Batch>, DbError> {
        match self.state {
            StreamState::Exhausted => {
                return AttemptOutcome::Success {
                    value: None,
                    attempts: 0,
                };
            }
            StreamState::Invalidated => {
                return AttemptOutcome::FatalFailure {
                    error: DbError::Unknown(format!(
                        "batch stream for partition {} was invalidated by an earlier failure",
                        self.partition.id
                    )),
                    attempts: 0,
                };
            }
            StreamState::Open => {}
        }

        let extractor = self.extractor;
        let request = FetchRequest {
            table: self.partition.read_table(),
            schema: extractor.schema,
            order_by: extractor.order_by,
            filter: self.partition.read_filter(),
            after: self.last_key.as_deref(),
            offset: self.next_offset,
            limit: extractor.batch_size,
        };

        let outcome = retry
            .run(|| extractor.session.fetch_rows(&request), classify_db_error)
            .await;

        let (rows, attempts) = match outcome {
            AttemptOutcome::Success { value, attempts } => (value, attempts),
            failed => {
                self.state = StreamState::Invalidated;
                return failed.map(|_| None);
            }
        };

        if (rows.len() as u64) < extractor.batch_size {
            self.state = StreamState::Exhausted;
        }
        if rows.is_empty() {
            return AttemptOutcome::Success {
                value: None,
                attempts,
            };
        }

        if let (Some(key), Some(last)) = (&extractor.seek_key, rows.last()) {
            self.last_key = Some(key.iter().map(|&i| last.get(i).clone()).collect());
        }

        self.sequence += 1;
        let batch = Batch {
            partition: self.partition.id.clone(),
            sequence: self.sequence,
            offset: self.next_offset,
            rows,
        };
        self.next_offset += batch.len() as u64;

        debug!(
            partition = %batch.partition,
            sequence = batch.sequence,
            rows = batch.len(),
            "Extracted batch"
        );
        AttemptOutcome::Success {
            value: Some(batch),
            attempts,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.next_offset
    }
}
