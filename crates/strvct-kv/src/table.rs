use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{KvError, KvResult};
use crate::gate::Admission;
use crate::journal::Journal;
use crate::request::{TxAction, TxRequest};
use crate::traits::NativeTransaction;
use crate::value::KvValue;

/// Committed key-value state shared by the table-backed folders.
#[derive(Debug, Default)]
pub(crate) struct Table {
    entries: RwLock<BTreeMap<String, KvValue>>,
}

impl Table {
    pub(crate) fn get(&self, key: &str) -> Option<KvValue> {
        self.entries.read().expect("lock poisoned").get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.read().expect("lock poisoned").contains_key(key)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.read().expect("lock poisoned").keys().cloned().collect()
    }

    pub(crate) fn entries(&self) -> Vec<(String, KvValue)> {
        self.entries
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }

    /// Apply a validated batch under one write lock.
    pub(crate) fn apply(&self, requests: &[TxRequest]) {
        let mut map = self.entries.write().expect("lock poisoned");
        for request in requests {
            match (&request.action, &request.value) {
                (TxAction::Add | TxAction::Update, Some(value)) => {
                    map.insert(request.key.clone(), value.clone());
                }
                (TxAction::Remove, _) => {
                    map.remove(&request.key);
                }
                // submit() rejects value-less writes.
                (_, None) => {}
            }
        }
    }
}

/// Native transaction over a [`Table`], optionally journaled.
pub(crate) struct TableTx {
    table: Arc<Table>,
    journal: Option<Arc<Journal>>,
    staged: Vec<TxRequest>,
    /// Key existence after the staged requests, for `Add` checks.
    pending: BTreeMap<String, bool>,
    _admission: Admission,
}

impl TableTx {
    pub(crate) fn new(
        table: Arc<Table>,
        journal: Option<Arc<Journal>>,
        admission: Admission,
    ) -> Self {
        Self {
            table,
            journal,
            staged: Vec::new(),
            pending: BTreeMap::new(),
            _admission: admission,
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.pending
            .get(key)
            .copied()
            .unwrap_or_else(|| self.table.contains(key))
    }
}

#[async_trait]
impl NativeTransaction for TableTx {
    fn submit(&mut self, request: &TxRequest) -> KvResult<()> {
        if request.action != TxAction::Remove && request.value.is_none() {
            return Err(KvError::Engine(format!("{request} has no value")));
        }
        match request.action {
            TxAction::Add => {
                if self.exists(&request.key) {
                    return Err(KvError::DuplicateKey(request.key.clone()));
                }
                self.pending.insert(request.key.clone(), true);
            }
            TxAction::Update => {
                self.pending.insert(request.key.clone(), true);
            }
            TxAction::Remove => {
                self.pending.insert(request.key.clone(), false);
            }
        }
        self.staged.push(request.clone());
        Ok(())
    }

    async fn complete(&mut self) -> KvResult<()> {
        let staged = std::mem::take(&mut self.staged);
        self.pending.clear();
        if staged.is_empty() {
            return Ok(());
        }
        if let Some(journal) = &self.journal {
            journal.append(&staged)?;
        }
        self.table.apply(&staged);
        debug!(requests = staged.len(), "table transaction complete");
        Ok(())
    }

    fn abort(&mut self) {
        debug!(requests = self.staged.len(), "table transaction aborted");
        self.staged.clear();
        self.pending.clear();
    }
}
