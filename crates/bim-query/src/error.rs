use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("range index error: {0}")]
    Index(String),
    #[error("query queue has been terminated")]
    QueueTerminated,
    #[error("failed to start query worker: {0}")]
    Spawn(#[from] std::io::Error),
}
