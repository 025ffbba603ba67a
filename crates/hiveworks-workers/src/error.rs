use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] hiveworks_queue::QueueError),
    #[error(transparent)]
    Store(#[from] hiveworks_store::StoreError),
    #[error(transparent)]
    Spider(#[from] hiveworks_types::SpiderError),
}
