use connectors::sql::base::error::{ConnectorError, DbError};
use engine_config::error::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to set up the connection pools: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid --schedule '{value}': {reason}")]
    InvalidSchedule { value: String, reason: &'static str },

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to write the report: {0}")]
    ReportWrite(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),
}
