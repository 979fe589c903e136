use crate::retry::classify_db_error;
use connectors::sql::base::{adapter::SqlSession, error::DbError, requests::MaterializeRequest};
use engine_core::{error::TransferError, retry::RetryPolicy};
use model::{
    core::identifiers::TableRef,
    filter::RowFilter,
    partition::{Partition, PartitionId, PartitionStatus, RowRange},
    schema::TableSchema,
};
use tracing::{info, warn};

/// Row ranges for `n` partitions over `total_rows` ordered rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPlan {
    /// One logical partition over the whole table, nothing materialized.
    Single,
    Ranges(Vec<RowRange>),
}

/// Every range holds `total_rows / n` rows and the last one also takes the remainder.
pub fn plan(total_rows: u64, n: u32) -> SplitPlan {
    let parts = u64::from(n);
    if parts <= 1 || parts > total_rows {
        return SplitPlan::Single;
    }

    let per_partition = total_rows / parts;
    let ranges = (0..parts)
        .map(|i| {
            let offset = i * per_partition;
            let limit = if i + 1 == parts {
                total_rows - offset
            } else {
                per_partition
            };
            RowRange { offset, limit }
        })
        .collect();

    SplitPlan::Ranges(ranges)
}

#[derive(Debug)]
pub struct SplitOutcome {
    pub total_rows: u64,
    /// Ordered by ordinal. Partitions whose table could not be created are `Failed`.
    pub partitions: Vec<Partition>,
    pub creation_errors: Vec<(PartitionId, TransferError)>,
}

impl SplitOutcome {
    pub fn is_split(&self) -> bool {
        self.partitions.iter().any(|p| p.artifact().is_some())
    }
}

/// Divides a source table into partition tables under the internal schema.
#[derive(Debug, Clone)]
pub struct Splitter {
    retry: RetryPolicy,
    internal_schema: String,
}

impl Splitter {
    pub fn new(retry: RetryPolicy, internal_schema: impl Into<String>) -> Self {
        Splitter {
            retry,
            internal_schema: internal_schema.into(),
        }
    }

    /// Name of the partition table for `ordinal`.
    pub fn artifact(&self, table: &TableRef, ordinal: u32) -> TableRef {
        table.partition(&self.internal_schema, ordinal)
    }

    /// Rows of `table` that pass `filter`.
    pub async fn count_rows(
        &self,
        session: &dyn SqlSession,
        table: &TableRef,
        filter: Option<&RowFilter>,
    ) -> Result<u64, TransferError> {
        self.retry
            .run(|| session.count_rows(table, filter), classify_db_error)
            .await
            .into_result()
            .map_err(|e| TransferError::db("count source rows", e))
    }

    /// Whether `split_rows` would create partition tables rather than one logical
    /// partition.
    pub fn will_split(total_rows: u64, n: u32) -> bool {
        matches!(plan(total_rows, n), SplitPlan::Ranges(_))
    }

    /// Counts the (filtered) rows of `table` and cuts them into at most `n` partitions.
    ///
    /// Each partition table is dropped before it is created, so calling this again
    /// with the same inputs yields the same boundaries.
    pub async fn split(
        &self,
        session: &dyn SqlSession,
        table: &TableRef,
        schema: &TableSchema,
        filter: Option<&RowFilter>,
        n: u32,
    ) -> Result<SplitOutcome, TransferError> {
        let total_rows = self.count_rows(session, table, filter).await?;
        Ok(self
            .split_rows(session, table, schema, filter, total_rows, n)
            .await)
    }

    /// Same as `split` for an already counted table.
    pub async fn split_rows(
        &self,
        session: &dyn SqlSession,
        table: &TableRef,
        schema: &TableSchema,
        filter: Option<&RowFilter>,
        total_rows: u64,
        n: u32,
    ) -> SplitOutcome {
        let order_by = schema.order_key();
        let SplitPlan::Ranges(ranges) = plan(total_rows, n) else {
            info!(%table, total_rows, requested = n, "Using a single partition");
            return SplitOutcome {
                total_rows,
                partitions: vec![Partition::whole_table(
                    table.clone(),
                    filter.cloned(),
                    total_rows,
                )],
                creation_errors: Vec::new(),
            };
        };

        let mut partitions = Vec::with_capacity(ranges.len());
        let mut creation_errors = Vec::new();

        for (ordinal, range) in (1..).zip(ranges) {
            let artifact = self.artifact(table, ordinal);
            let mut partition = Partition::materialized(table, artifact.clone(), ordinal, range);

            let request = MaterializeRequest {
                source: table,
                destination: &artifact,
                order_by: &order_by,
                filter,
                offset: range.offset,
                limit: range.limit,
            };

            match self.materialize(session, &request).await {
                Ok(created) => {
                    if created != range.limit {
                        warn!(
                            partition = %partition.id,
                            expected = range.limit,
                            created,
                            "Partition row count differs from plan"
                        );
                    }
                    info!(
                        partition = %partition.id,
                        offset = range.offset,
                        rows = created,
                        "Created partition table"
                    );
                }
                Err(source) => {
                    warn!(partition = %partition.id, error = %source, "Failed to create partition table");
                    partition.status = PartitionStatus::Failed;
                    creation_errors.push((
                        partition.id.clone(),
                        TransferError::PartitionCreation {
                            partition: partition.id.to_string(),
                            source,
                        },
                    ));
                }
            }
            partitions.push(partition);
        }

        info!(
            %table,
            total_rows,
            partitions = partitions.len(),
            failed = creation_errors.len(),
            "Split source table"
        );

        SplitOutcome {
            total_rows,
            partitions,
            creation_errors,
        }
    }

    async fn materialize(
        &self,
        session: &dyn SqlSession,
        request: &MaterializeRequest<'_>,
    ) -> Result<u64, DbError> {
        self.retry
            .run(|| session.drop_table(request.destination), classify_db_error)
            .await
            .into_result()?;
        self.retry
            .run(|| session.materialize_range(request), classify_db_error)
            .await
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(plan: &SplitPlan) -> Vec<u64> {
        match plan {
            SplitPlan::Single => vec![],
            SplitPlan::Ranges(ranges) => ranges.iter().map(|r| r.limit).collect(),
        }
    }

    #[test]
    fn even_split() {
        let plan = plan(10_000, 10);
        assert_eq!(limits(&plan), vec![1000; 10]);
    }

    #[test]
    fn last_partition_takes_the_remainder() {
        let plan = plan(10_005, 10);
        let mut expected = vec![1000; 9];
        expected.push(1005);
        assert_eq!(limits(&plan), expected);
    }

    #[test]
    fn ranges_are_contiguous_and_cover_every_row() {
        for (total, n) in [(7, 3), (100, 7), (1_000_003, 16), (5, 5)] {
            let SplitPlan::Ranges(ranges) = plan(total, n) else {
                panic!("expected ranges for {total}/{n}");
            };
            assert_eq!(ranges.len(), n as usize);
            assert_eq!(ranges[0].offset, 0);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].offset + pair[0].limit, pair[1].offset);
            }
            assert_eq!(ranges.iter().map(|r| r.limit).sum::<u64>(), total);
        }
    }

    #[test]
    fn short_circuits_to_a_single_partition() {
        assert_eq!(plan(10, 0), SplitPlan::Single);
        assert_eq!(plan(10, 1), SplitPlan::Single);
        assert_eq!(plan(3, 4), SplitPlan::Single);
        assert_eq!(plan(0, 10), SplitPlan::Single);
    }

    #[test]
    fn same_inputs_same_boundaries() {
        assert_eq!(plan(123_457, 9), plan(123_457, 9));
    }
}
