use crate::sql::{
    base::{
        adapter::{SqlAdapter, SqlSession},
        error::{ConnectorError, DbError},
    },
    postgres::{config::PgConnectionConfig, session::PgSession, utils::build_pool},
};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::core::identifiers::TableRef;
use std::time::Duration;
use tracing::{info, warn};

/// PostgreSQL store backed by a bounded deadpool connection pool.
#[derive(Clone)]
pub struct PgAdapter {
    pool: Pool,
    endpoint: String,
    connect_timeout: Duration,
    query_timeout: Duration,
    copy_chunk_rows: usize,
}

impl PgAdapter {
    /// Builds the pool. Connections are opened lazily, on first checkout.
    pub fn connect(config: &PgConnectionConfig) -> Result<Self, ConnectorError> {
        let pool = build_pool(config)?;
        info!(endpoint = %config.endpoint(), pool_size = config.pool_size, "Postgres pool ready");

        Ok(PgAdapter {
            pool,
            endpoint: config.endpoint(),
            connect_timeout: config.connect_timeout,
            query_timeout: config.query_timeout,
            copy_chunk_rows: config.copy_chunk_rows,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SqlAdapter for PgAdapter {
    async fn session(&self) -> Result<Box<dyn SqlSession>, DbError> {
        let session =
            PgSession::open(self.pool.clone(), self.query_timeout, self.copy_chunk_rows).await?;
        Ok(Box::new(session))
    }

    async fn test_connection(&self) -> bool {
        let check = async {
            let client = self.pool.get().await?;
            client.simple_query("SELECT 1").await?;
            Ok::<_, DbError>(())
        };

        match tokio::time::timeout(self.connect_timeout, check).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(endpoint = %self.endpoint, %error, "Connection test failed");
                false
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, timeout = ?self.connect_timeout, "Connection test timed out");
                false
            }
        }
    }

    async fn get_row_count(&self, table: &TableRef) -> Result<i64, DbError> {
        let session = self.session().await?;
        let count = session.count_rows(table, None).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    fn max_connections(&self) -> usize {
        self.pool.status().max_size
    }
}
