use std::io;

/// Errors from folder and transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The folder has not been opened yet.
    #[error("folder {0} is not open")]
    NotOpen(String),

    /// Keys must be non-empty strings.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// An insert-only request hit an existing key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The transaction no longer accepts requests.
    #[error("transaction already committed")]
    AlreadyCommitted,

    /// `begin()` was called on a transaction that is already open.
    #[error("transaction already begun")]
    AlreadyBegun,

    /// A request or commit was issued before `begin()`.
    #[error("transaction not begun")]
    NotBegun,

    /// The transaction was aborted and cannot be used further.
    #[error("transaction aborted")]
    Aborted,

    /// The storage engine reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error from the journal.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;
