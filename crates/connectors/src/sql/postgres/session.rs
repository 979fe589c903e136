use crate::sql::{
    base::{
        adapter::SqlSession,
        error::DbError,
        requests::{FetchRequest, MaterializeRequest},
    },
    postgres::{
        encoder::PgCopyValueEncoder,
        metadata::{self, QUERY_LIST_TABLES_SQL},
        query,
        row::decode_row,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Object, Pool};
use futures_util::{SinkExt, pin_mut};
use model::{
    core::identifiers::TableRef,
    filter::RowFilter,
    records::row::Row,
    schema::{ColumnDefinition, TableSchema},
};
use std::time::Duration;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::error::Elapsed,
};
use tokio_postgres::Client;
use tracing::{debug, warn};

/// Runs `$body` against the session's connection under the query timeout.
macro_rules! with_client {
    ($self:ident, $operation:literal, |$client:ident| $body:expr) => {{
        let mut slot = $self.checkout().await?;
        let outcome = match slot.as_mut() {
            Some($client) => tokio::time::timeout($self.query_timeout, async { $body }).await,
            None => Ok(Err(DbError::ConnectionClosed)),
        };
        $self.settle(&mut slot, $operation, outcome)
    }};
}

/// A single pooled connection. When the connection is lost the next call checks
/// out a fresh one; a connection abandoned by a timeout is detached from the pool
/// so it is never handed out again.
pub(crate) struct PgSession {
    pool: Pool,
    slot: Mutex<Option<Object>>,
    query_timeout: Duration,
    copy_chunk_rows: usize,
}

impl PgSession {
    pub(crate) async fn open(
        pool: Pool,
        query_timeout: Duration,
        copy_chunk_rows: usize,
    ) -> Result<Self, DbError> {
        let client = pool.get().await?;
        Ok(PgSession {
            pool,
            slot: Mutex::new(Some(client)),
            query_timeout,
            copy_chunk_rows: copy_chunk_rows.max(1),
        })
    }

    async fn checkout(&self) -> Result<MutexGuard<'_, Option<Object>>, DbError> {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|client| client.is_closed()) {
            debug!("Session connection was closed, checking out a new one");
            *slot = None;
        }
        if slot.is_none() {
            *slot = Some(self.pool.get().await?);
        }
        Ok(slot)
    }

    fn settle<T>(
        &self,
        slot: &mut Option<Object>,
        operation: &'static str,
        outcome: Result<Result<T, DbError>, Elapsed>,
    ) -> Result<T, DbError> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if err.is_connection_lost() {
                    slot.take();
                }
                Err(err)
            }
            Err(_) => {
                warn!(operation, timeout = ?self.query_timeout, "Query timed out, discarding connection");
                if let Some(client) = slot.take() {
                    drop(Object::take(client));
                }
                Err(DbError::Timeout {
                    operation,
                    after: self.query_timeout,
                })
            }
        }
    }
}

async fn execute(client: &Client, sql: &str) -> Result<u64, DbError> {
    debug!(sql, "Executing statement");
    Ok(client.execute(sql, &[]).await?)
}

async fn count(client: &Client, sql: &str) -> Result<u64, DbError> {
    let row = client.query_one(sql, &[]).await?;
    let count: i64 = row.try_get(0)?;
    Ok(count.max(0) as u64)
}

async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>, DbError> {
    let rows = client.query(QUERY_LIST_TABLES_SQL, &[&schema]).await?;
    Ok(rows
        .iter()
        .map(|row| row.try_get::<_, String>("table_name"))
        .collect::<Result<Vec<_>, _>>()?)
}

async fn fetch(client: &Client, request: &FetchRequest<'_>) -> Result<Vec<Row>, DbError> {
    let sql = query::select_batch(request);
    let rows = client.query(&sql, &[]).await?;
    rows.iter()
        .map(|row| decode_row(row, &request.schema.columns))
        .collect()
}

async fn copy_rows(
    client: &mut Object,
    statement: &str,
    rows: &[Row],
    chunk_rows: usize,
) -> Result<u64, DbError> {
    let tx = client.transaction().await?;

    let written = {
        let sink = tx.copy_in::<_, Bytes>(statement).await?;
        pin_mut!(sink);

        let encoder = PgCopyValueEncoder::new();
        for chunk in rows.chunks(chunk_rows) {
            let mut frame = String::new();
            for row in chunk {
                encoder.encode_row(row, &mut frame);
            }
            sink.as_mut().send(Bytes::from(frame)).await?;
        }

        sink.as_mut().finish().await?
    };

    tx.commit().await?;
    Ok(written)
}

#[async_trait]
impl SqlSession for PgSession {
    async fn table_schema(&self, table: &TableRef) -> Result<Option<TableSchema>, DbError> {
        with_client!(self, "table_schema", |client| metadata::table_schema(client, table).await)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DbError> {
        with_client!(self, "list_tables", |client| list_tables(client, schema).await)
    }

    async fn count_rows(
        &self,
        table: &TableRef,
        filter: Option<&RowFilter>,
    ) -> Result<u64, DbError> {
        let sql = query::count_rows(table, filter);
        with_client!(self, "count_rows", |client| count(client, &sql).await)
    }

    async fn create_schema(&self, schema: &str) -> Result<(), DbError> {
        let sql = query::create_schema(schema);
        with_client!(self, "create_schema", |client| execute(client, &sql).await.map(|_| ()))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), DbError> {
        let sql = query::create_table(schema);
        with_client!(self, "create_table", |client| execute(client, &sql).await.map(|_| ()))
    }

    async fn drop_table(&self, table: &TableRef) -> Result<(), DbError> {
        let sql = query::drop_table(table);
        with_client!(self, "drop_table", |client| execute(client, &sql).await.map(|_| ()))
    }

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError> {
        let sql = query::truncate_table(table);
        with_client!(self, "truncate_table", |client| execute(client, &sql).await.map(|_| ()))
    }

    async fn materialize_range(&self, request: &MaterializeRequest<'_>) -> Result<u64, DbError> {
        let sql = query::materialize_range(request);
        with_client!(self, "materialize_range", |client| execute(client, &sql).await)
    }

    async fn fetch_rows(&self, request: &FetchRequest<'_>) -> Result<Vec<Row>, DbError> {
        with_client!(self, "fetch_rows", |client| fetch(client, request).await)
    }

    async fn write_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDefinition],
        rows: &[Row],
    ) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let statement = query::copy_from_stdin(table, columns);
        debug!(%table, rows = rows.len(), "COPY batch");
        with_client!(self, "write_rows", |client| {
            copy_rows(client, &statement, rows, self.copy_chunk_rows).await
        })
    }
}
