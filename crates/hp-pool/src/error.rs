use hp_common::ParseError;
use hp_queue::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool not found: {0}")]
    NotFound(String),

    #[error("Pool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid reject policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("[{pool_id}] invalid pool size: core_size {core_size}, max_size {max_size}")]
    InvalidPoolSize {
        pool_id: String,
        core_size: usize,
        max_size: usize,
    },

    #[error("Task rejected by pool {pool_id}")]
    Rejected { pool_id: String },

    #[error("Pool is shut down: {0}")]
    Shutdown(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<ParseError> for PoolError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::InvalidPolicy(_) => PoolError::InvalidPolicy(err.to_string()),
            ParseError::InvalidQueueKind(_) => PoolError::InvalidConfig(err.to_string()),
        }
    }
}
