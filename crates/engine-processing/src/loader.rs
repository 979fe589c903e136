use crate::retry::classify_db_error;
use connectors::sql::base::{adapter::SqlSession, error::DbError};
use engine_core::retry::{AttemptOutcome, RetryPolicy};
use model::{core::identifiers::TableRef, records::batch::Batch, schema::ColumnDefinition};
use tracing::{debug, warn};

/// Appends batches to the target table over one held target session.
pub struct BatchLoader<'a> {
    session: &'a dyn SqlSession,
    target: &'a TableRef,
    columns: &'a [ColumnDefinition],
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        session: &'a dyn SqlSession,
        target: &'a TableRef,
        columns: &'a [ColumnDefinition],
    ) -> Self {
        BatchLoader {
            session,
            target,
            columns,
        }
    }

    /// Writes the whole batch or nothing. Retried attempts rewrite the full batch.
    pub async fn load(&self, batch: &Batch, retry: &RetryPolicy) -> AttemptOutcome<u64, DbError> {
        let outcome = retry
            .run(
                || self.session.write_rows(self.target, self.columns, &batch.rows),
                classify_db_error,
            )
            .await;

        if let AttemptOutcome::Success { value, attempts } = &outcome {
            if *value != batch.len() as u64 {
                warn!(
                    partition = %batch.partition,
                    sequence = batch.sequence,
                    expected = batch.len(),
                    written = value,
                    "Target reported a different row count for batch"
                );
            }
            debug!(
                partition = %batch.partition,
                sequence = batch.sequence,
                rows = value,
                attempts,
                "Loaded batch"
            );
        }
        outcome
    }
}
