//! The [`Folder`] and [`NativeTransaction`] traits.
//!
//! A folder is the storage engine side of the contract: point reads,
//! enumeration, and a way to open an engine-level read-write transaction.
//! [`KeyValueTransaction`](crate::KeyValueTransaction) wraps the native
//! transaction with lifecycle flags and diagnostics.

use async_trait::async_trait;

use crate::error::KvResult;
use crate::request::TxRequest;
use crate::value::KvValue;

/// Engine-level read-write transaction against one folder.
///
/// Implementations hold the folder's admission for their whole lifetime.
#[async_trait]
pub trait NativeTransaction: Send {
    /// Validate and queue one request.
    ///
    /// Errors are per-request failures (e.g. a duplicate key on `Add`).
    fn submit(&mut self, request: &TxRequest) -> KvResult<()>;

    /// Apply every queued request atomically.
    ///
    /// Either all requests become visible or none do.
    async fn complete(&mut self) -> KvResult<()>;

    /// Discard every queued request.
    fn abort(&mut self);
}

/// A named partition of the key-value substrate.
///
/// Implementations must be thread-safe (`Send + Sync`). Every read sees
/// committed state only; writes go through native transactions.
#[async_trait]
pub trait Folder: Send + Sync {
    /// Folder name.
    fn name(&self) -> &str;

    /// Open the folder (create or recover backing storage).
    async fn open(&self) -> KvResult<()>;

    /// Returns `true` once `open()` has succeeded.
    fn is_open(&self) -> bool;

    /// Read one key. Returns `Ok(None)` if absent.
    async fn at(&self, key: &str) -> KvResult<Option<KvValue>>;

    /// Check whether a key exists.
    async fn has_key(&self, key: &str) -> KvResult<bool>;

    /// All keys, sorted.
    async fn all_keys(&self) -> KvResult<Vec<String>>;

    /// All entries, sorted by key.
    async fn all_entries(&self) -> KvResult<Vec<(String, KvValue)>>;

    /// Number of keys.
    async fn count(&self) -> KvResult<usize>;

    /// Open a native read-write transaction.
    ///
    /// Waits until no other transaction is open against this folder.
    async fn open_native_tx(&self) -> KvResult<Box<dyn NativeTransaction>>;

    /// Upsert one key in its own transaction.
    async fn at_put(&self, key: &str, value: KvValue) -> KvResult<()> {
        let mut tx = self.open_native_tx().await?;
        tx.submit(&TxRequest::update(key, value))?;
        tx.complete().await
    }

    /// Remove one key in its own transaction.
    async fn remove_at(&self, key: &str) -> KvResult<()> {
        let mut tx = self.open_native_tx().await?;
        tx.submit(&TxRequest::remove(key))?;
        tx.complete().await
    }
}
