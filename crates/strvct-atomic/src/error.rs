use strvct_kv::KvError;

/// Errors from atomic map operations.
#[derive(Debug, thiserror::Error)]
pub enum AtomicError {
    /// The map has not been opened.
    #[error("atomic map is not open")]
    NotOpen,

    /// The operation is not allowed while a transaction is open.
    #[error("operation not allowed inside a transaction")]
    InTransaction,

    /// The operation requires an open transaction.
    #[error("no transaction is open")]
    NotInTransaction,

    /// Keys must be non-empty.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A binary value was written to a strings-only map.
    #[error("non-string value for key {0}")]
    NonStringValue(String),

    /// The underlying folder failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Result alias for atomic map operations.
pub type AtomicResult<T> = Result<T, AtomicError>;
