use crate::sql::base::{
    error::DbError,
    requests::{FetchRequest, MaterializeRequest},
};
use async_trait::async_trait;
use model::{
    core::identifiers::TableRef,
    filter::RowFilter,
    records::row::Row,
    schema::{ColumnDefinition, TableSchema},
};

/// A pooled store. Sessions handed out by it are bounded by the pool size.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Checks out one connection for exclusive use by the caller.
    async fn session(&self) -> Result<Box<dyn SqlSession>, DbError>;

    /// Side-effect-free liveness check.
    async fn test_connection(&self) -> bool;

    /// Exact row count of `table`.
    async fn get_row_count(&self, table: &TableRef) -> Result<i64, DbError>;

    fn max_connections(&self) -> usize;
}

/// One held connection. Every call is bounded by the store's query timeout.
#[async_trait]
pub trait SqlSession: Send + Sync {
    // Introspection
    async fn table_schema(&self, table: &TableRef) -> Result<Option<TableSchema>, DbError>;
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DbError>;
    async fn count_rows(&self, table: &TableRef, filter: Option<&RowFilter>)
    -> Result<u64, DbError>;

    // DDL
    async fn create_schema(&self, schema: &str) -> Result<(), DbError>;
    async fn create_table(&self, schema: &TableSchema) -> Result<(), DbError>;
    async fn drop_table(&self, table: &TableRef) -> Result<(), DbError>;
    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError>;

    // Data movement
    async fn materialize_range(&self, request: &MaterializeRequest<'_>) -> Result<u64, DbError>;
    async fn fetch_rows(&self, request: &FetchRequest<'_>) -> Result<Vec<Row>, DbError>;

    /// Appends `rows` to `table` as one all-or-nothing unit and returns the rows written.
    async fn write_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDefinition],
        rows: &[Row],
    ) -> Result<u64, DbError>;
}
