use connectors::sql::base::error::DbError;
use model::errors::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("{store} database is unreachable")]
    Unreachable { store: &'static str },

    #[error(
        "{store} pool holds {available} connections but {required} workers need one each"
    )]
    PoolTooSmall {
        store: &'static str,
        available: usize,
        required: usize,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("target schema mismatch: {}", .0.join("; "))]
    SchemaMismatch(Vec<String>),

    #[error("partition {partition} could not be created: {source}")]
    PartitionCreation {
        partition: String,
        #[source]
        source: DbError,
    },

    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbError,
    },

    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn db(context: &'static str, source: DbError) -> Self {
        TransferError::Database { context, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Unreachable { .. } => ErrorKind::Connectivity,
            TransferError::PoolTooSmall { .. } => ErrorKind::Other,
            TransferError::Schema(_) => ErrorKind::Schema,
            TransferError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            TransferError::PartitionCreation { .. } => ErrorKind::PartitionCreation,
            TransferError::Database { source, .. } => source.kind(),
            TransferError::WorkerPanic(_) => ErrorKind::Other,
            TransferError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
