use crate::{env::EnvManager, error::ConfigError};
use connectors::sql::postgres::config::{PgConnectionConfig, TlsMode};
use engine_core::retry::RetryPolicy;
use model::core::identifiers::TableRef;
use std::{path::PathBuf, time::Duration};
use tracing::debug;

/// PostgreSQL limits identifiers to 63 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const LOGGED_KEYS: &[&str] = &[
    "SOURCE_HOST",
    "SOURCE_PORT",
    "SOURCE_DATABASE",
    "SOURCE_USERNAME",
    "SOURCE_PASSWORD",
    "SOURCE_SCHEMA",
    "SOURCE_TABLE",
    "TARGET_HOST",
    "TARGET_PORT",
    "TARGET_DATABASE",
    "TARGET_USERNAME",
    "TARGET_PASSWORD",
    "TARGET_SCHEMA",
    "TARGET_TABLE",
    "BATCH_SIZE",
    "MAX_WORKERS",
    "ENABLE_TABLE_SPLITTING",
    "NUMBER_OF_SPLITS",
];

/// Immutable configuration of the transfer tool, read once at startup.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub source: PgConnectionConfig,
    pub target: PgConnectionConfig,
    pub source_table: TableRef,
    pub target_table: TableRef,
    pub batch_size: u64,
    pub max_workers: usize,
    pub splitting_enabled: bool,
    pub split_count: u32,
    pub internal_schema: String,
    pub watermark_column: Option<String>,
    pub watermark_value: Option<String>,
    pub truncate_target: bool,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

struct Shared {
    pool_size: usize,
    connect_timeout: Duration,
    query_timeout: Duration,
    chunk_size: usize,
}

impl TransferConfig {
    pub fn from_env(env: &EnvManager) -> Result<Self, ConfigError> {
        debug!(vars = ?env.redacted(LOGGED_KEYS), "Loading configuration");
        let mut problems = Vec::new();

        let batch_size: u64 = env.parse_or("BATCH_SIZE", 10_000, &mut problems);
        let max_workers: usize = env.parse_or("MAX_WORKERS", 4, &mut problems);
        let shared = Shared {
            pool_size: env.parse_or("POOL_SIZE", max_workers, &mut problems),
            connect_timeout: Duration::from_secs(env.parse_or(
                "CONNECTION_TIMEOUT",
                30,
                &mut problems,
            )),
            query_timeout: Duration::from_secs(env.parse_or("QUERY_TIMEOUT", 300, &mut problems)),
            chunk_size: env.parse_or("CHUNK_SIZE", 50_000, &mut problems),
        };

        let source_table = match env.get("SOURCE_TABLE") {
            Some(name) => TableRef::new(env.get_or("SOURCE_SCHEMA", "public"), name),
            None => {
                problems.push("SOURCE_TABLE is required".to_string());
                TableRef::new("public", "")
            }
        };
        let target_table = TableRef::new(
            env.get_or("TARGET_SCHEMA", "ETL"),
            env.get_or("TARGET_TABLE", &source_table.name),
        );

        let retry = RetryPolicy::new(
            env.parse_or("RETRY_MAX_ATTEMPTS", 5, &mut problems),
            Duration::from_millis(env.parse_or("RETRY_BASE_DELAY_MS", 250, &mut problems)),
            Duration::from_millis(env.parse_or("RETRY_MAX_DELAY_MS", 5_000, &mut problems)),
        );
        if env.get("RETRY_MAX_ATTEMPTS") == Some("0") {
            problems.push("RETRY_MAX_ATTEMPTS must be greater than 0".to_string());
        }

        let config = TransferConfig {
            source: connection(env, "SOURCE", &shared, &mut problems),
            target: connection(env, "TARGET", &shared, &mut problems),
            source_table,
            target_table,
            batch_size,
            max_workers,
            splitting_enabled: env.flag_or("ENABLE_TABLE_SPLITTING", false, &mut problems),
            split_count: env.parse_or("NUMBER_OF_SPLITS", 10, &mut problems),
            internal_schema: env.get_or("ETL_INTERNAL_SCHEMA", "etl_internal"),
            watermark_column: env.get("WATERMARK_COLUMN").map(str::to_string),
            watermark_value: env.get("WATERMARK_VALUE").map(str::to_string),
            truncate_target: env.flag_or("TRUNCATE_TARGET", true, &mut problems),
            retry,
            progress_interval: Duration::from_secs(env.parse_or(
                "PROGRESS_INTERVAL_SECS",
                10,
                &mut problems,
            )),
            log_level: env.get_or("LOG_LEVEL", "info"),
            log_file: env.get("LOG_FILE").map(PathBuf::from),
        };

        problems.extend(config.problems());
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Range and consistency checks on already-parsed values.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.batch_size == 0 {
            problems.push("BATCH_SIZE must be greater than 0".to_string());
        }
        if self.max_workers == 0 {
            problems.push("MAX_WORKERS must be greater than 0".to_string());
        }
        if self.source.copy_chunk_rows == 0 {
            problems.push("CHUNK_SIZE must be greater than 0".to_string());
        }
        if self.source.pool_size < self.max_workers {
            problems.push(format!(
                "POOL_SIZE ({}) must be at least MAX_WORKERS ({})",
                self.source.pool_size, self.max_workers
            ));
        }
        if self.internal_schema.is_empty() {
            problems.push("ETL_INTERNAL_SCHEMA must not be empty".to_string());
        }
        if self.progress_interval.is_zero() {
            problems.push("PROGRESS_INTERVAL_SECS must be greater than 0".to_string());
        }
        if let Some(problem) = split_count_problem(&self.source_table, self.split_count) {
            problems.push(problem);
        }

        problems
    }
}

/// Rejects a split count of zero or one whose partition names would not fit in a
/// PostgreSQL identifier.
pub fn split_count_problem(table: &TableRef, split_count: u32) -> Option<String> {
    if split_count == 0 {
        return Some("NUMBER_OF_SPLITS must be greater than 0".to_string());
    }

    let longest = format!("{}_{}", table.name, split_count);
    (longest.len() > MAX_IDENTIFIER_LEN).then(|| {
        format!(
            "partition name '{longest}' exceeds the {MAX_IDENTIFIER_LEN}-byte identifier limit"
        )
    })
}

fn connection(
    env: &EnvManager,
    prefix: &str,
    shared: &Shared,
    problems: &mut Vec<String>,
) -> PgConnectionConfig {
    let key = |name: &str| format!("{prefix}_{name}");

    let tls = match env.get(&key("SSLMODE")) {
        None => TlsMode::default(),
        Some(raw) => raw.parse().unwrap_or_else(|e: String| {
            problems.push(format!("{}: {e}", key("SSLMODE")));
            TlsMode::default()
        }),
    };

    PgConnectionConfig {
        host: env.get_or(&key("HOST"), "localhost"),
        port: env.parse_or(&key("PORT"), 5432, problems),
        database: env.get_or(&key("DATABASE"), "postgres"),
        username: env.get_or(&key("USERNAME"), "postgres"),
        password: env.get_or(&key("PASSWORD"), ""),
        tls,
        pool_size: shared.pool_size,
        connect_timeout: shared.connect_timeout,
        query_timeout: shared.query_timeout,
        copy_chunk_rows: shared.chunk_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvManager {
        EnvManager::from_vars(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn defaults_apply_to_a_minimal_environment() {
        let config = TransferConfig::from_env(&env(&[("SOURCE_TABLE", "orders")])).unwrap();

        assert_eq!(config.source_table, TableRef::new("public", "orders"));
        assert_eq!(config.target_table, TableRef::new("ETL", "orders"));
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.source.pool_size, 4);
        assert_eq!(config.split_count, 10);
        assert!(!config.splitting_enabled);
        assert!(config.truncate_target);
        assert_eq!(config.internal_schema, "etl_internal");
        assert_eq!(config.source.tls, TlsMode::Prefer);
        assert_eq!(config.target.query_timeout, Duration::from_secs(300));
    }

    #[test]
    fn every_problem_is_reported_together() {
        let err = TransferConfig::from_env(&env(&[
            ("BATCH_SIZE", "0"),
            ("MAX_WORKERS", "8"),
            ("POOL_SIZE", "2"),
            ("SOURCE_SSLMODE", "verify-full"),
            ("SOURCE_PORT", "five"),
        ]))
        .unwrap_err();

        let ConfigError::Invalid(problems) = err else {
            panic!("expected validation problems");
        };
        assert_eq!(problems.len(), 5, "{problems:?}");
    }

    #[test]
    fn split_count_must_keep_partition_names_short() {
        let long = TableRef::new("public", "x".repeat(60));
        assert!(split_count_problem(&long, 9).is_none());
        assert!(split_count_problem(&long, 100).is_some());
        assert!(split_count_problem(&TableRef::new("public", "orders"), 0).is_some());
    }
}
