use deadpool_postgres::PoolError;
use model::errors::ErrorKind;
use std::{error::Error as _, time::Duration};
use thiserror::Error;
use tokio_postgres::error::SqlState;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Low-level socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    /// Error reported by the server, with its SQLSTATE.
    #[error("server error {}: {message}", code.code())]
    Server { code: SqlState, message: String },

    /// Client-side driver failure that carries no SQLSTATE.
    #[error("driver error: {0}")]
    Driver(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Writing rows failed at the application level.
    #[error("write error: {0}")]
    Write(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl DbError {
    pub fn server(code: &str, message: impl Into<String>) -> Self {
        DbError::Server {
            code: SqlState::from_code(code),
            message: message.into(),
        }
    }

    /// Maps the error onto the shared taxonomy. Only connectivity, timeout and
    /// conflict kinds are retried by callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Io(_) | DbError::ConnectionClosed => ErrorKind::Connectivity,
            DbError::Timeout { .. } | DbError::PoolTimeout => ErrorKind::Timeout,
            DbError::Server { code, .. } => classify_sqlstate(code),
            DbError::Decode { .. } => ErrorKind::Data,
            DbError::Driver(_) | DbError::Pool(_) | DbError::Write(_) | DbError::Unknown(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether the connection that raised this error can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            DbError::Io(_) | DbError::ConnectionClosed => true,
            DbError::Server { code, .. } => {
                code.code().starts_with("08")
                    || matches!(
                        *code,
                        SqlState::ADMIN_SHUTDOWN
                            | SqlState::CRASH_SHUTDOWN
                            | SqlState::CANNOT_CONNECT_NOW
                    )
            }
            _ => false,
        }
    }
}

fn classify_sqlstate(code: &SqlState) -> ErrorKind {
    match *code {
        SqlState::QUERY_CANCELED => return ErrorKind::Timeout,
        SqlState::T_R_SERIALIZATION_FAILURE
        | SqlState::T_R_DEADLOCK_DETECTED
        | SqlState::LOCK_NOT_AVAILABLE => return ErrorKind::Conflict,
        SqlState::TOO_MANY_CONNECTIONS
        | SqlState::ADMIN_SHUTDOWN
        | SqlState::CRASH_SHUTDOWN
        | SqlState::CANNOT_CONNECT_NOW => return ErrorKind::Connectivity,
        _ => {}
    }

    match code.code().get(..2) {
        Some("08") => ErrorKind::Connectivity,
        Some("23") => ErrorKind::ConstraintViolation,
        Some("28") => ErrorKind::Authentication,
        Some("42") => ErrorKind::Schema,
        Some("22") => ErrorKind::Data,
        _ => ErrorKind::Other,
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            return DbError::Server {
                code: db_err.code().clone(),
                message: db_err.message().to_string(),
            };
        }

        if err.is_closed() {
            return DbError::ConnectionClosed;
        }

        if let Some(io_err) = err
            .source()
            .and_then(|source| source.downcast_ref::<std::io::Error>())
        {
            return DbError::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }

        DbError::Driver(err.to_string())
    }
}

impl From<PoolError> for DbError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => DbError::PoolTimeout,
            PoolError::Backend(pg_err) => DbError::from(pg_err),
            PoolError::Closed => DbError::ConnectionClosed,
            other => DbError::Pool(other.to_string()),
        }
    }
}

/// Errors happening during adapter or connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] native_tls::Error),

    #[error("connection pool setup failed: {0}")]
    Pool(String),
}
