use strvct_atomic::AtomicError;
use strvct_kv::KvError;
use strvct_types::TypeError;

/// Errors from object-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object pool is not open")]
    NotOpen,

    /// Serializing or registering an object whose `should_store` is off.
    #[error("object of type {0} is not storable")]
    NotStorable(String),

    /// A blob's record was requested before its data URL was prepared.
    #[error("blob {0} has no prepared data url")]
    MissingPreparedData(String),

    /// A slot received a value of the wrong shape.
    #[error("invalid value for slot {slot}: {reason}")]
    InvalidSlot { slot: String, reason: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Background encoding of blob data failed.
    #[error("preparation failed: {0}")]
    Preparation(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Atomic(#[from] AtomicError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

impl StoreError {
    pub(crate) fn invalid_slot(slot: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSlot {
            slot: slot.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for object-store operations.
pub type StoreResult<T> = Result<T, StoreError>;
