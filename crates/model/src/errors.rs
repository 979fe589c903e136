use serde::Serialize;
use std::fmt;

/// Classification shared by every layer. The first three kinds are transient and
/// retried; everything else is fatal to the operation that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Timeout,
    Conflict,
    Schema,
    SchemaMismatch,
    PartitionCreation,
    ConstraintViolation,
    Authentication,
    Data,
    Cancelled,
    Other,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Connectivity | ErrorKind::Timeout | ErrorKind::Conflict
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Schema => "schema",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::PartitionCreation => "partition_creation",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Data => "data",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
