use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-layer errors.
///
/// A failed verification is not an error; it is reported through
/// [`ChainReport`](crate::ChainReport) or a `false` from `verify_document`.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate event id: {0}")]
    DuplicateEvent(String),

    #[error("ledger entries are immutable: {0}")]
    ImmutableEntry(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation `{operation}` timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    #[error("backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    /// Wrap a backend failure with the operation that produced it.
    pub fn backend(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend(format!("{operation}: {err}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
