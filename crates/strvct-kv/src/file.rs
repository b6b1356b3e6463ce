use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{KvConfig, SyncMode};
use crate::error::{KvError, KvResult};
use crate::gate::AdmissionGate;
use crate::journal::Journal;
use crate::request::TxRequest;
use crate::table::{Table, TableTx};
use crate::traits::{Folder, NativeTransaction};
use crate::value::KvValue;

/// Durable folder: an in-memory table plus a journal of committed batches.
///
/// `open()` replays the journal into the table and discards any torn tail.
/// Every completed transaction appends exactly one journal frame before
/// its requests become visible.
pub struct FileFolder {
    name: String,
    path: PathBuf,
    sync_mode: SyncMode,
    table: Arc<Table>,
    gate: AdmissionGate,
    journal: OnceLock<Arc<Journal>>,
}

impl FileFolder {
    /// Folder named `name` whose journal lives at `<dir>/<name>.journal`.
    pub fn new(dir: &Path, name: impl Into<String>, sync_mode: SyncMode) -> Self {
        let name = name.into();
        Self {
            path: dir.join(format!("{name}.journal")),
            name,
            sync_mode,
            table: Arc::new(Table::default()),
            gate: AdmissionGate::new(),
            journal: OnceLock::new(),
        }
    }

    /// Folder described by a config, rooted at `dir`.
    pub fn from_config(dir: &Path, config: &KvConfig) -> Self {
        Self::new(dir, config.folder.clone(), config.sync_mode)
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal as one batch holding the live entries.
    ///
    /// Returns the journal size in bytes after compaction.
    pub async fn compact(&self) -> KvResult<u64> {
        let journal = self.journal()?;
        let _admission = self.gate.admit().await;
        let batch: Vec<TxRequest> = self
            .table
            .entries()
            .into_iter()
            .map(|(key, value)| TxRequest::update(key, value))
            .collect();
        let before = journal.offset();
        journal.rewrite(&batch)?;
        let after = journal.offset();
        info!(folder = %self.name, before, after, "journal compacted");
        Ok(after)
    }

    fn journal(&self) -> KvResult<&Arc<Journal>> {
        self.journal
            .get()
            .ok_or_else(|| KvError::NotOpen(self.name.clone()))
    }
}

#[async_trait]
impl Folder for FileFolder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> KvResult<()> {
        if self.journal.get().is_some() {
            return Ok(());
        }
        let _admission = self.gate.admit().await;
        if self.journal.get().is_some() {
            return Ok(());
        }

        let journal = Journal::open(&self.path, self.sync_mode)?;
        let recovery = journal.recover()?;
        journal.truncate_to(recovery.valid_len)?;
        self.table.clear();
        for batch in &recovery.batches {
            self.table.apply(batch);
        }
        debug!(
            folder = %self.name,
            batches = recovery.batches.len(),
            keys = self.table.len(),
            "folder opened"
        );
        // Guarded by the admission above, so nobody else can have set it.
        let _ = self.journal.set(Arc::new(journal));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.journal.get().is_some()
    }

    async fn at(&self, key: &str) -> KvResult<Option<KvValue>> {
        self.journal()?;
        Ok(self.table.get(key))
    }

    async fn has_key(&self, key: &str) -> KvResult<bool> {
        self.journal()?;
        Ok(self.table.contains(key))
    }

    async fn all_keys(&self) -> KvResult<Vec<String>> {
        self.journal()?;
        Ok(self.table.keys())
    }

    async fn all_entries(&self) -> KvResult<Vec<(String, KvValue)>> {
        self.journal()?;
        Ok(self.table.entries())
    }

    async fn count(&self) -> KvResult<usize> {
        self.journal()?;
        Ok(self.table.len())
    }

    async fn open_native_tx(&self) -> KvResult<Box<dyn NativeTransaction>> {
        let journal = Arc::clone(self.journal()?);
        let admission = self.gate.admit().await;
        Ok(Box::new(TableTx::new(
            Arc::clone(&self.table),
            Some(journal),
            admission,
        )))
    }
}

impl std::fmt::Debug for FileFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFolder")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("key_count", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let folder = FileFolder::new(dir.path(), "objects", SyncMode::EveryWrite);
            folder.open().await.unwrap();
            folder.at_put("foo", "bar".into()).await.unwrap();
            folder.at_put("bin", vec![1u8, 2, 3].into()).await.unwrap();
            folder.remove_at("bin").await.unwrap();
        }

        let folder = FileFolder::new(dir.path(), "objects", SyncMode::default());
        folder.open().await.unwrap();
        assert_eq!(folder.at("foo").await.unwrap(), Some(KvValue::from("bar")));
        assert!(!folder.has_key("bin").await.unwrap());
        assert_eq!(folder.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn requires_open() {
        let dir = tempfile::tempdir().unwrap();
        let folder = FileFolder::new(dir.path(), "f", SyncMode::default());
        assert!(!folder.is_open());
        assert!(matches!(folder.count().await, Err(KvError::NotOpen(_))));
        assert!(matches!(folder.open_native_tx().await, Err(KvError::NotOpen(_))));
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let folder = FileFolder::new(dir.path(), "f", SyncMode::default());
        folder.open().await.unwrap();
        folder.at_put("k", "v".into()).await.unwrap();
        folder.open().await.unwrap();
        assert_eq!(folder.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn torn_commit_is_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path;
        let len_after_first;
        {
            let folder = FileFolder::new(dir.path(), "f", SyncMode::EveryWrite);
            folder.open().await.unwrap();
            folder.at_put("a", "1".into()).await.unwrap();
            len_after_first = std::fs::metadata(folder.path()).unwrap().len();
            let mut tx = folder.open_native_tx().await.unwrap();
            tx.submit(&TxRequest::update("b", "2".into())).unwrap();
            tx.submit(&TxRequest::update("c", "3".into())).unwrap();
            tx.complete().await.unwrap();
            path = folder.path().to_path_buf();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 2).unwrap();
        drop(file);

        let folder = FileFolder::new(dir.path(), "f", SyncMode::default());
        folder.open().await.unwrap();
        assert_eq!(folder.all_keys().await.unwrap(), vec!["a"]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_first);
    }

    #[tokio::test]
    async fn compact_keeps_live_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let folder = FileFolder::new(dir.path(), "f", SyncMode::default());
        folder.open().await.unwrap();
        for i in 0..20 {
            folder.at_put("k", format!("v{i}").into()).await.unwrap();
        }
        folder.at_put("gone", "x".into()).await.unwrap();
        folder.remove_at("gone").await.unwrap();
        let before = std::fs::metadata(folder.path()).unwrap().len();

        let after = folder.compact().await.unwrap();
        assert!(after < before);
        drop(folder);

        let folder = FileFolder::new(dir.path(), "f", SyncMode::default());
        folder.open().await.unwrap();
        assert_eq!(folder.all_keys().await.unwrap(), vec!["k"]);
        assert_eq!(folder.at("k").await.unwrap(), Some(KvValue::from("v19")));
    }

    #[tokio::test]
    async fn from_config_uses_folder_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = KvConfig {
            folder: "notes".into(),
            ..KvConfig::default()
        };
        let folder = FileFolder::from_config(dir.path(), &config);
        assert_eq!(folder.name(), "notes");
        assert!(folder.path().ends_with("notes.journal"));
    }
}
