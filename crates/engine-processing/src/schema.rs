use crate::{error::SchemaError, retry::classify_db_error};
use connectors::sql::base::{adapter::SqlSession, error::DbError};
use engine_core::retry::RetryPolicy;
use model::{core::identifiers::TableRef, schema::TableSchema};
use std::{fmt, future::Future};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateOutcome {
    Created,
    Validated,
}

/// Captures source structure and creates or validates the target from it.
#[derive(Debug, Clone)]
pub struct SchemaInspector {
    retry: RetryPolicy,
}

impl SchemaInspector {
    pub fn new(retry: RetryPolicy) -> Self {
        SchemaInspector { retry }
    }

    async fn retried<T, F, Fut>(
        &self,
        action: &'static str,
        object: &(dyn fmt::Display + Sync),
        op: F,
    ) -> Result<T, SchemaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        self.retry
            .run(op, classify_db_error)
            .await
            .into_result()
            .map_err(|source| SchemaError::Database {
                action,
                object: object.to_string(),
                source,
            })
    }

    pub async fn inspect(
        &self,
        session: &dyn SqlSession,
        table: &TableRef,
    ) -> Result<TableSchema, SchemaError> {
        let schema = self
            .retried("read metadata", table, || session.table_schema(table))
            .await?
            .ok_or_else(|| SchemaError::NotFound(table.clone()))?;

        if schema.columns.is_empty() {
            return Err(SchemaError::NoColumns(table.clone()));
        }

        info!(
            %table,
            columns = schema.columns.len(),
            primary_key = ?schema.primary_key,
            approx_rows = schema.approx_row_count,
            "Captured source schema"
        );
        Ok(schema)
    }

    pub async fn ensure_schema(
        &self,
        session: &dyn SqlSession,
        name: &str,
    ) -> Result<(), SchemaError> {
        self.retried("create schema", &name, || session.create_schema(name))
            .await
    }

    /// Makes `target` ready to receive rows shaped like `schema`.
    pub async fn replicate(
        &self,
        session: &dyn SqlSession,
        schema: &TableSchema,
        target: &TableRef,
        drop_if_exists: bool,
    ) -> Result<ReplicateOutcome, SchemaError> {
        let target_schema = schema.retarget(target.clone());

        if drop_if_exists {
            self.retried("drop target", target, || session.drop_table(target))
                .await?;
            self.retried("create target", target, || {
                session.create_table(&target_schema)
            })
            .await?;
            info!(%target, "Dropped and recreated target table");
            return Ok(ReplicateOutcome::Created);
        }

        let existing = self
            .retried("read target metadata", target, || {
                session.table_schema(target)
            })
            .await?;

        match existing {
            None => {
                self.retried("create target", target, || {
                    session.create_table(&target_schema)
                })
                .await?;
                info!(%target, "Created target table");
                Ok(ReplicateOutcome::Created)
            }
            Some(existing) => {
                let problems = compatibility_problems(schema, &existing);
                if !problems.is_empty() {
                    warn!(%target, ?problems, "Target table is incompatible");
                    return Err(SchemaError::Mismatch {
                        table: target.clone(),
                        problems,
                    });
                }
                info!(%target, "Validated existing target table");
                Ok(ReplicateOutcome::Validated)
            }
        }
    }

    pub async fn truncate(
        &self,
        session: &dyn SqlSession,
        target: &TableRef,
    ) -> Result<(), SchemaError> {
        self.retried("truncate target", target, || session.truncate_table(target))
            .await?;
        info!(%target, "Truncated target table");
        Ok(())
    }
}

/// Reasons rows of `source` cannot be appended to `target`. Empty when compatible.
pub fn compatibility_problems(source: &TableSchema, target: &TableSchema) -> Vec<String> {
    let mut problems = Vec::new();

    for column in &source.columns {
        match target.column(&column.name) {
            None => problems.push(format!("missing column '{}'", column.name)),
            Some(existing) if !existing.data_type.accepts(&column.data_type) => {
                problems.push(format!(
                    "column '{}' has type {} which cannot hold source type {}",
                    column.name, existing.type_name, column.type_name
                ))
            }
            Some(_) => {}
        }
    }

    for column in &target.columns {
        if source.column(&column.name).is_none() && !column.nullable && column.default.is_none() {
            problems.push(format!(
                "target column '{}' is NOT NULL without a default and has no source column",
                column.name
            ));
        }
    }

    problems
}
