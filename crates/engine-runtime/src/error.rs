use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A worker task was aborted outside partition processing. Partitions it had
    /// not reported have no outcome.
    #[error("worker task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
