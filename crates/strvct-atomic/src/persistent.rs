use std::sync::Arc;

use strvct_kv::{Folder, KeyValueTransaction, KvConfig, KvValue};
use tracing::{debug, warn};

use crate::error::AtomicResult;
use crate::map::AtomicMap;

/// An [`AtomicMap`] whose commits are written through to a [`Folder`].
///
/// The overlay is turned into one [`KeyValueTransaction`]: new keys become
/// `at_add`, existing keys `at_update`, tombstones `remove_at`. The snapshot
/// is merged only after that transaction completes. If it fails, the
/// snapshot is unchanged and the transaction stays open with its overlay
/// intact, so the caller can retry `commit()` or `revert()`.
pub struct PersistentAtomicMap {
    folder: Arc<dyn Folder>,
    map: AtomicMap,
}

impl PersistentAtomicMap {
    pub fn new(folder: Arc<dyn Folder>) -> Self {
        Self {
            folder,
            map: AtomicMap::new(),
        }
    }

    /// Map over `folder` using the strings-only setting from `config`.
    pub fn from_config(folder: Arc<dyn Folder>, config: &KvConfig) -> Self {
        Self::new(folder).with_strict_strings(config.strict_strings)
    }

    /// Toggle the strings-only check on writes.
    pub fn with_strict_strings(mut self, strict: bool) -> Self {
        self.map = self.map.with_strict_strings(strict);
        self
    }

    /// Open the folder and load its contents as the snapshot.
    pub async fn open(&mut self) -> AtomicResult<()> {
        if self.map.is_open() {
            return Ok(());
        }
        self.folder.open().await?;
        let entries = self.folder.all_entries().await?;
        let count = entries.len();
        self.map.load_snapshot(entries)?;
        self.map.open();
        debug!(folder = self.folder.name(), keys = count, "persistent map opened");
        Ok(())
    }

    pub fn close(&mut self) -> AtomicResult<()> {
        self.map.close()
    }

    pub fn is_open(&self) -> bool {
        self.map.is_open()
    }

    pub fn folder(&self) -> &Arc<dyn Folder> {
        &self.folder
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    pub fn is_in_tx(&self) -> bool {
        self.map.is_in_tx()
    }

    pub fn begin(&mut self) -> AtomicResult<()> {
        self.map.begin()
    }

    /// Write the overlay to the folder, then merge it into the snapshot.
    ///
    /// Returns the number of changes applied.
    pub async fn commit(&mut self) -> AtomicResult<usize> {
        let changes = self.map.pending_changes()?;
        if changes.is_empty() {
            return self.map.commit();
        }

        let mut tx = KeyValueTransaction::new(Arc::clone(&self.folder));
        tx.begin().await?;
        for (key, value) in changes {
            let queued = match value {
                None => tx.remove_at(key),
                Some(value) if self.map.snapshot_has_key(key) => tx.at_update(key, value.clone()),
                Some(value) => tx.at_add(key, value.clone()),
            };
            if let Err(e) = queued {
                warn!(folder = self.folder.name(), key, error = %e, "commit request rejected");
                return Err(e.into());
            }
        }
        if let Err(e) = tx.commit().await {
            warn!(folder = self.folder.name(), error = %e, "folder commit failed; snapshot unchanged");
            return Err(e.into());
        }
        self.map.commit()
    }

    pub fn revert(&mut self) -> AtomicResult<()> {
        self.map.revert()
    }

    /// Remove every key, durably.
    pub async fn clear(&mut self) -> AtomicResult<usize> {
        let keys = self.map.keys()?;
        self.map.begin()?;
        for key in &keys {
            self.map.remove_key(key)?;
        }
        match self.commit().await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.map.revert()?;
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Map operations
    // ---------------------------------------------------------------

    pub fn at(&self, key: &str) -> AtomicResult<Option<&KvValue>> {
        self.map.at(key)
    }

    pub fn at_text(&self, key: &str) -> AtomicResult<Option<&str>> {
        self.map.at_text(key)
    }

    pub fn has_key(&self, key: &str) -> AtomicResult<bool> {
        self.map.has_key(key)
    }

    pub fn at_put(&mut self, key: &str, value: impl Into<KvValue>) -> AtomicResult<()> {
        self.map.at_put(key, value)
    }

    pub fn remove_key(&mut self, key: &str) -> AtomicResult<()> {
        self.map.remove_key(key)
    }

    pub fn for_each_kv(&self, f: impl FnMut(&str, &KvValue)) -> AtomicResult<()> {
        self.map.for_each_kv(f)
    }

    pub fn keys(&self) -> AtomicResult<Vec<String>> {
        self.map.keys()
    }

    pub fn count(&self) -> AtomicResult<usize> {
        self.map.count()
    }
}

impl std::fmt::Debug for PersistentAtomicMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentAtomicMap")
            .field("folder", &self.folder.name())
            .field("is_open", &self.map.is_open())
            .field("is_in_tx", &self.map.is_in_tx())
            .finish()
    }
}

impl From<PersistentAtomicMap> for AtomicMap {
    fn from(map: PersistentAtomicMap) -> Self {
        map.map
    }
}
