use thiserror::Error;

/// Errors that can arise constructing or validating the shared domain types
/// themselves (as opposed to I/O errors, which live in the crates that do
/// I/O). Kept small and matchable, following `riptide-types::errors::CoreError`'s
/// constructor-plus-classification style.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("invalid item: {0}")]
    InvalidItem(String),
}

impl TypesError {
    pub fn invalid_schedule(msg: impl Into<String>) -> Self {
        Self::InvalidSchedule(msg.into())
    }

    pub fn invalid_item(msg: impl Into<String>) -> Self {
        Self::InvalidItem(msg.into())
    }

    /// Programmer errors here are never retryable - they indicate malformed
    /// configuration that must be fixed before the run can proceed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
