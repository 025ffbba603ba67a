use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Connection/pool errors are transient; a missing row or a malformed
    /// JSON column is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(e) if matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut))
    }
}

/// Source's MySQL column widths, carried forward for the Postgres tables.
pub const URL_MAX_BYTES: usize = 2048;
pub const ERROR_MESSAGE_MAX_BYTES: usize = 65535;

pub(crate) fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
