use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue capacity must be greater than 0, got {0}")]
    InvalidCapacity(usize),
}
