use crate::error::CliError;
use connectors::sql::{base::adapter::SqlAdapter, postgres::adapter::PgAdapter};
use engine_config::config::TransferConfig;
use engine_core::connections::ConnectionManager;
use model::core::identifiers::TableRef;
use std::sync::Arc;
use tracing::{error, info};

/// Builds both pools. No connection is opened until first use.
pub fn connect(config: &TransferConfig) -> Result<ConnectionManager, CliError> {
    let source: Arc<dyn SqlAdapter> = Arc::new(PgAdapter::connect(&config.source)?);
    let target: Arc<dyn SqlAdapter> = Arc::new(PgAdapter::connect(&config.target)?);
    Ok(ConnectionManager::new(source, target))
}

/// Checks both stores and reports whether each is reachable.
pub async fn test_connections(config: &TransferConfig, connections: &ConnectionManager) -> bool {
    let (source_ok, target_ok) = tokio::join!(
        connections.source.test_connection(),
        connections.target.test_connection()
    );

    for (store, endpoint, ok) in [
        ("source", config.source.endpoint(), source_ok),
        ("target", config.target.endpoint(), target_ok),
    ] {
        if ok {
            info!(store, %endpoint, "Connection OK");
        } else {
            error!(store, %endpoint, "Connection failed");
        }
        println!("{store:<8} {endpoint:<40} {}", if ok { "ok" } else { "unreachable" });
    }

    source_ok && target_ok
}

pub async fn row_count(
    connections: &ConnectionManager,
    table: &str,
    on_target: bool,
) -> Result<i64, CliError> {
    let table: TableRef = table.parse().map_err(CliError::InvalidTable)?;
    let adapter = if on_target {
        &connections.target
    } else {
        &connections.source
    };

    let count = adapter.get_row_count(&table).await?;
    println!("{table}: {count}");
    Ok(count)
}
