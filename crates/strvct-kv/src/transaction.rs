//! [`KeyValueTransaction`]: one atomic batch of point writes against a folder.
//!
//! Lifecycle: `new()` -> `begin()` -> any number of `at_add` / `at_update` /
//! `remove_at` -> `commit()` or `abort()`. A transaction is never reused.
//!
//! `is_committed` flips as soon as `commit()` starts, before the engine has
//! finished; `is_completed` flips only once the batch is durable. No request
//! is accepted after `is_committed`, even while completion is pending.

use std::backtrace::Backtrace;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{KvError, KvResult};
use crate::request::TxRequest;
use crate::traits::{Folder, NativeTransaction};
use crate::value::KvValue;

/// Atomic read-write transaction against one folder.
pub struct KeyValueTransaction {
    folder: Arc<dyn Folder>,
    native: Option<Box<dyn NativeTransaction>>,
    requests: Vec<TxRequest>,
    is_committed: bool,
    is_aborted: bool,
    is_completed: bool,
    /// Call site of `begin()`, for errors surfacing later.
    begin_trace: Option<Backtrace>,
}

impl KeyValueTransaction {
    /// Create an unopened transaction against `folder`.
    pub fn new(folder: Arc<dyn Folder>) -> Self {
        Self {
            folder,
            native: None,
            requests: Vec::new(),
            is_committed: false,
            is_aborted: false,
            is_completed: false,
            begin_trace: None,
        }
    }

    /// Open the native transaction.
    ///
    /// Waits for the folder's admission gate, so at most one transaction is
    /// open per folder at a time.
    pub async fn begin(&mut self) -> KvResult<()> {
        self.assert_not_committed()?;
        if self.is_aborted {
            return Err(KvError::Aborted);
        }
        if self.native.is_some() {
            return Err(KvError::AlreadyBegun);
        }
        self.begin_trace = Some(Backtrace::capture());
        self.native = Some(self.folder.open_native_tx().await?);
        debug!(folder = self.folder.name(), "transaction begun");
        Ok(())
    }

    /// Queue an insert-only write. Fails if `key` already exists.
    pub fn at_add(&mut self, key: &str, value: impl Into<KvValue>) -> KvResult<()> {
        self.push_request(TxRequest::add(key, value.into()))
    }

    /// Queue an upsert.
    pub fn at_update(&mut self, key: &str, value: impl Into<KvValue>) -> KvResult<()> {
        self.push_request(TxRequest::update(key, value.into()))
    }

    /// Queue a delete.
    pub fn remove_at(&mut self, key: &str) -> KvResult<()> {
        self.push_request(TxRequest::remove(key))
    }

    /// Apply every queued request, all or nothing.
    pub async fn commit(&mut self) -> KvResult<()> {
        self.assert_not_committed()?;
        if self.is_aborted {
            return Err(KvError::Aborted);
        }
        let mut native = self.native.take().ok_or(KvError::NotBegun)?;
        self.is_committed = true;

        match native.complete().await {
            Ok(()) => {
                self.is_completed = true;
                debug!(
                    folder = self.folder.name(),
                    requests = self.requests.len(),
                    "transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                self.is_aborted = true;
                native.abort();
                self.log_failure("commit", &e);
                Err(e)
            }
        }
    }

    /// Cancel the transaction. Irreversible; nothing queued is applied.
    pub fn abort(&mut self) -> KvResult<()> {
        self.assert_not_committed()?;
        if self.is_aborted {
            return Err(KvError::Aborted);
        }
        if let Some(mut native) = self.native.take() {
            native.abort();
        }
        self.is_aborted = true;
        debug!(folder = self.folder.name(), "transaction aborted");
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.is_committed
    }

    pub fn is_aborted(&self) -> bool {
        self.is_aborted
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// Returns `true` once the transaction reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.is_aborted || self.is_completed
    }

    /// Requests queued so far, in submission order.
    pub fn requests(&self) -> &[TxRequest] {
        &self.requests
    }

    /// Name of the folder this transaction writes to.
    pub fn folder_name(&self) -> &str {
        self.folder.name()
    }

    fn assert_not_committed(&self) -> KvResult<()> {
        if self.is_committed {
            return Err(KvError::AlreadyCommitted);
        }
        Ok(())
    }

    fn push_request(&mut self, request: TxRequest) -> KvResult<()> {
        self.assert_not_committed()?;
        if self.is_aborted {
            return Err(KvError::Aborted);
        }
        if request.key.is_empty() {
            return Err(KvError::InvalidKey(request.key));
        }
        let native = self.native.as_mut().ok_or(KvError::NotBegun)?;

        if let Err(e) = native.submit(&request) {
            // A failed request takes the whole transaction down with it.
            native.abort();
            self.native = None;
            self.is_aborted = true;
            self.log_failure(&request.to_string(), &e);
            return Err(e);
        }
        self.requests.push(request);
        Ok(())
    }

    fn log_failure(&self, what: &str, e: &KvError) {
        let trace = self
            .begin_trace
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_default();
        error!(
            folder = self.folder.name(),
            request = what,
            error = %e,
            begin_trace = %trace,
            "transaction failed"
        );
    }
}

impl Drop for KeyValueTransaction {
    fn drop(&mut self) {
        if let Some(mut native) = self.native.take() {
            native.abort();
            debug!(
                folder = self.folder.name(),
                requests = self.requests.len(),
                "open transaction dropped; aborted"
            );
        }
    }
}

impl std::fmt::Debug for KeyValueTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueTransaction")
            .field("folder", &self.folder.name())
            .field("requests", &self.requests.len())
            .field("is_committed", &self.is_committed)
            .field("is_aborted", &self.is_aborted)
            .field("is_completed", &self.is_completed)
            .finish()
    }
}
