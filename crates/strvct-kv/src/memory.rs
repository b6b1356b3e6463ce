use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{KvError, KvResult};
use crate::gate::AdmissionGate;
use crate::table::{Table, TableTx};
use crate::traits::{Folder, NativeTransaction};
use crate::value::KvValue;

/// In-memory, `BTreeMap`-based folder.
///
/// Intended for tests and embedding. Data is lost when the folder is
/// dropped. Transactions are serialized through the folder's admission
/// gate exactly as they are for durable folders.
pub struct InMemoryFolder {
    name: String,
    table: Arc<Table>,
    gate: AdmissionGate,
    open: AtomicBool,
}

impl InMemoryFolder {
    /// Create a new, unopened folder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Arc::new(Table::default()),
            gate: AdmissionGate::new(),
            open: AtomicBool::new(false),
        }
    }

    /// Create and open a folder in one step.
    pub async fn opened(name: impl Into<String>) -> KvResult<Self> {
        let folder = Self::new(name);
        folder.open().await?;
        Ok(folder)
    }

    /// The folder's admission gate.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Remove every key. Waits for admission like any other write.
    pub async fn clear(&self) -> KvResult<()> {
        self.ensure_open()?;
        let _admission = self.gate.admit().await;
        self.table.clear();
        Ok(())
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(KvError::NotOpen(self.name.clone()))
        }
    }
}

#[async_trait]
impl Folder for InMemoryFolder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> KvResult<()> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn at(&self, key: &str) -> KvResult<Option<KvValue>> {
        self.ensure_open()?;
        Ok(self.table.get(key))
    }

    async fn has_key(&self, key: &str) -> KvResult<bool> {
        self.ensure_open()?;
        Ok(self.table.contains(key))
    }

    async fn all_keys(&self) -> KvResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.table.keys())
    }

    async fn all_entries(&self) -> KvResult<Vec<(String, KvValue)>> {
        self.ensure_open()?;
        Ok(self.table.entries())
    }

    async fn count(&self) -> KvResult<usize> {
        self.ensure_open()?;
        Ok(self.table.len())
    }

    async fn open_native_tx(&self) -> KvResult<Box<dyn NativeTransaction>> {
        self.ensure_open()?;
        let admission = self.gate.admit().await;
        Ok(Box::new(TableTx::new(Arc::clone(&self.table), None, admission)))
    }
}

impl std::fmt::Debug for InMemoryFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFolder")
            .field("name", &self.name)
            .field("key_count", &self.table.len())
            .field("open", &self.is_open())
            .finish()
    }
}
