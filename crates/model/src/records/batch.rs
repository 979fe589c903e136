use crate::{partition::PartitionId, records::row::Row};

/// Rows handed from the extractor to the loader. Never persisted.
#[derive(Debug, Clone)]
pub struct Batch {
    pub partition: PartitionId,
    /// 1-based position of the batch within its partition.
    pub sequence: u64,
    /// Offset of the first row within the partition's ordered rows.
    pub offset: u64,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
