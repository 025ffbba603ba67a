use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store error: {0}")]
    Store(#[from] hiveworks_store::StoreError),
}
