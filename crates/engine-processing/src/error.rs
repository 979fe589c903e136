use connectors::sql::base::error::DbError;
use engine_core::error::TransferError;
use model::{core::identifiers::TableRef, errors::ErrorKind};
use thiserror::Error;

/// Failures of the schema stage. All of them abort the job before any data moves.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("table {0} does not exist")]
    NotFound(TableRef),

    #[error("table {0} has no columns")]
    NoColumns(TableRef),

    #[error("failed to {action} for {object}: {source}")]
    Database {
        action: &'static str,
        object: String,
        #[source]
        source: DbError,
    },

    #[error("target {table} is incompatible with the source: {}", problems.join("; "))]
    Mismatch {
        table: TableRef,
        problems: Vec<String>,
    },
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::Mismatch { .. } => ErrorKind::SchemaMismatch,
            SchemaError::Database { source, .. } if source.kind().is_transient() => source.kind(),
            _ => ErrorKind::Schema,
        }
    }
}

impl From<SchemaError> for TransferError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Mismatch { problems, .. } => TransferError::SchemaMismatch(problems),
            other => TransferError::Schema(other.to_string()),
        }
    }
}
