use connectors::sql::base::error::DbError;
use engine_core::retry::RetryDisposition;

/// Connectivity, timeout and contention failures are retried; everything else stops.
pub fn classify_db_error(err: &DbError) -> RetryDisposition {
    if err.kind().is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}
