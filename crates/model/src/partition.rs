use crate::{core::identifiers::TableRef, filter::RowFilter};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId(Arc<str>);

impl PartitionId {
    pub fn new(table: &TableRef, ordinal: u32) -> Self {
        Self(Arc::from(format!("{}_{}", table.name, ordinal)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slice `[offset, offset + limit)` of the source table's ordered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionSource {
    /// The source table itself, read through an optional row filter.
    Table {
        table: TableRef,
        filter: Option<RowFilter>,
    },
    /// A partition table holding exactly the rows of one range.
    Materialized { table: TableRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    /// 1-based.
    pub ordinal: u32,
    pub source: PartitionSource,
    pub range: Option<RowRange>,
    pub estimated_row_count: u64,
    pub status: PartitionStatus,
}

impl Partition {
    /// The single logical partition covering the whole (filtered) table.
    pub fn whole_table(table: TableRef, filter: Option<RowFilter>, estimated_row_count: u64) -> Self {
        Partition {
            id: PartitionId::new(&table, 1),
            ordinal: 1,
            source: PartitionSource::Table { table, filter },
            range: None,
            estimated_row_count,
            status: PartitionStatus::Pending,
        }
    }

    pub fn materialized(source: &TableRef, artifact: TableRef, ordinal: u32, range: RowRange) -> Self {
        Partition {
            id: PartitionId::new(source, ordinal),
            ordinal,
            source: PartitionSource::Materialized { table: artifact },
            range: Some(range),
            estimated_row_count: range.limit,
            status: PartitionStatus::Pending,
        }
    }

    /// The physical partition table, if one was created for this partition.
    pub fn artifact(&self) -> Option<&TableRef> {
        match &self.source {
            PartitionSource::Materialized { table } => Some(table),
            PartitionSource::Table { .. } => None,
        }
    }

    /// Table the extractor reads from.
    pub fn read_table(&self) -> &TableRef {
        match &self.source {
            PartitionSource::Table { table, .. } | PartitionSource::Materialized { table } => table,
        }
    }

    /// Row filter the extractor applies. Partition tables are already filtered.
    pub fn read_filter(&self) -> Option<&RowFilter> {
        match &self.source {
            PartitionSource::Table { filter, .. } => filter.as_ref(),
            PartitionSource::Materialized { .. } => None,
        }
    }
}
