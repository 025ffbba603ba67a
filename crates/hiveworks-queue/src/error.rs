use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("popmin timed out after {0:?}")]
    PopTimeout(std::time::Duration),
    #[error("malformed queue entry: {0}")]
    Corrupt(String),
}

impl QueueError {
    /// Redis I/O failures and pop timeouts are transient; a corrupt entry is
    /// a data problem that retrying will not fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Corrupt(_))
    }
}
