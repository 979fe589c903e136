use crate::error::TransferError;
use connectors::sql::base::adapter::SqlAdapter;
use std::sync::Arc;
use tracing::info;

/// The source and target stores of a run.
#[derive(Clone)]
pub struct ConnectionManager {
    pub source: Arc<dyn SqlAdapter>,
    pub target: Arc<dyn SqlAdapter>,
}

impl ConnectionManager {
    pub fn new(source: Arc<dyn SqlAdapter>, target: Arc<dyn SqlAdapter>) -> Self {
        ConnectionManager { source, target }
    }

    /// Checks both stores are reachable and each pool can serve one connection per worker.
    pub async fn validate(&self, max_workers: usize) -> Result<(), TransferError> {
        let (source_ok, target_ok) =
            tokio::join!(self.source.test_connection(), self.target.test_connection());

        if !source_ok {
            return Err(TransferError::Unreachable { store: "source" });
        }
        if !target_ok {
            return Err(TransferError::Unreachable { store: "target" });
        }

        for (store, adapter) in [("source", &self.source), ("target", &self.target)] {
            let available = adapter.max_connections();
            if available < max_workers {
                return Err(TransferError::PoolTooSmall {
                    store,
                    available,
                    required: max_workers,
                });
            }
        }

        info!("Source and target connections validated");
        Ok(())
    }
}
