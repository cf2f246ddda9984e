use chatchan_db::{PartitionError, StoreError};

/// Application-level failures of the write path.
///
/// `Duplication` and `RaceCondition` are recoverable and absorbed wherever a
/// retry policy exists; they only reach callers once that policy gives up,
/// at which point they surface as `ServiceUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("duplicate: {0}")]
    Duplication(String),

    #[error("concurrent modification: {0}")]
    RaceCondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

impl ChatError {
    /// Errors after which redelivering a work event cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadRequest(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RaceCondition(_))
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(key) => Self::Duplication(key),
            other => Self::Store(other),
        }
    }
}
