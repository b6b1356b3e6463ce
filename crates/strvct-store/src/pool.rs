//! [`ObjectPool`]: the arena of live objects over one persistent map.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use strvct_atomic::PersistentAtomicMap;
use strvct_kv::Folder;
use strvct_types::{Pid, Record};
use tracing::{debug, info, warn};

use crate::blob::encode_base64;
use crate::config::PoolConfig;
use crate::context::{adopt, LoadCx, PidMinter, StoreCx};
use crate::error::{StoreError, StoreResult};
use crate::handle::ObjectRef;
use crate::meta::{DirtySink, StoreStatus};
use crate::registry::TypeRegistry;
use crate::storable::Storable;

/// Persists a graph of [`Storable`](crate::Storable) objects by pid.
///
/// Each record is a JSON string keyed by pid in a [`PersistentAtomicMap`].
/// Live objects are kept in an arena so every pid maps to one handle.
/// Mutations reach the pool through a shared [`DirtySink`]; `commit()`
/// serializes every dirty object, plus any object first referenced along
/// the way, and writes them in one transaction.
pub struct ObjectPool {
    config: PoolConfig,
    registry: TypeRegistry,
    map: PersistentAtomicMap,
    active: HashMap<Pid, ObjectRef>,
    sink: DirtySink,
    minter: PidMinter,
    pending_removals: BTreeSet<Pid>,
    pending_root: Option<Pid>,
}

/// Records built for one commit.
#[derive(Default)]
struct Batch {
    records: BTreeMap<Pid, Record>,
    stored: Vec<(Pid, ObjectRef)>,
    unprepared: Vec<(Pid, ObjectRef, Bytes)>,
    seen: BTreeSet<Pid>,
    /// Pids waiting to be serialized, including objects first registered
    /// during this commit.
    queue: VecDeque<Pid>,
}

impl Batch {
    /// Every pid this batch took responsibility for.
    fn pids(&self) -> impl Iterator<Item = &Pid> {
        self.seen.iter().chain(&self.queue)
    }
}

impl ObjectPool {
    pub fn new(folder: Arc<dyn Folder>, registry: TypeRegistry) -> Self {
        Self::with_config(folder, registry, PoolConfig::default())
    }

    pub fn with_config(folder: Arc<dyn Folder>, registry: TypeRegistry, config: PoolConfig) -> Self {
        Self {
            minter: PidMinter::new(&config),
            config,
            registry,
            map: PersistentAtomicMap::new(folder),
            active: HashMap::new(),
            sink: DirtySink::default(),
            pending_removals: BTreeSet::new(),
            pending_root: None,
        }
    }

    /// Open the folder and load its records into the snapshot.
    pub async fn open(&mut self) -> StoreResult<()> {
        self.map.open().await?;
        info!(
            folder = self.map.folder().name(),
            records = self.map.count()?,
            "object pool opened"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.map.is_open()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn map(&self) -> &PersistentAtomicMap {
        &self.map
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    /// Assign `handle` a pid and schedule it for the next commit.
    pub fn register(&mut self, handle: &ObjectRef) -> StoreResult<Pid> {
        self.assert_open()?;
        let (pid, fresh) = adopt(handle, &mut self.active, &self.sink, &self.minter)?;
        if fresh {
            self.sink.insert(pid.clone());
        }
        self.pending_removals.remove(&pid);
        Ok(pid)
    }

    /// Pids waiting for the next commit.
    pub fn dirty_pids(&self) -> Vec<Pid> {
        self.sink.pids()
    }

    pub fn has_dirty(&self) -> bool {
        !self.sink.is_empty() || !self.pending_removals.is_empty() || self.pending_root.is_some()
    }

    /// Number of live objects in the arena.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ---------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------

    /// Live object for `pid`, loading it (and whatever it references) on
    /// first access.
    ///
    /// Returns `None` for missing records and for records whose type is
    /// unknown or no longer storable.
    pub fn object_for_pid(&mut self, pid: &Pid) -> StoreResult<Option<ObjectRef>> {
        self.assert_open()?;
        if let Some(handle) = self.active.get(pid) {
            return Ok(Some(handle.clone()));
        }

        let mut cx = LoadCx::new(
            &mut self.active,
            &self.map,
            &self.registry,
            &self.sink,
            &self.config.root_key,
        );
        let result = cx.object_for_pid(pid);
        let (touched, loaded) = cx.into_parts();

        match result {
            Ok(handle) => {
                // Peers are all in the arena now, so hooks can follow any reference.
                for object_ref in &loaded {
                    let mut object = object_ref.write();
                    object.meta_mut().set_status(StoreStatus::Loaded);
                    object.did_load_from_store();
                }
                Ok(handle)
            }
            Err(e) => {
                for pid in &touched {
                    self.active.remove(pid);
                }
                warn!(pid = %pid, error = %e, "load failed");
                Err(e)
            }
        }
    }

    /// The stored record for `pid`, without materializing an object.
    pub fn record_for_pid(&self, pid: &Pid) -> StoreResult<Option<Record>> {
        self.assert_open()?;
        if pid.as_str() == self.config.root_key {
            return Ok(None);
        }
        match self.map.at_text(pid.as_str())? {
            Some(text) => Ok(Some(Record::from_json_str(text)?)),
            None => Ok(None),
        }
    }

    pub fn has_pid(&self, pid: &Pid) -> StoreResult<bool> {
        Ok(self.active.contains_key(pid) || self.record_for_pid(pid)?.is_some())
    }

    /// Every stored pid, excluding the root key.
    pub fn pids(&self) -> StoreResult<Vec<Pid>> {
        self.assert_open()?;
        let mut pids = Vec::new();
        for key in self.map.keys()? {
            if key != self.config.root_key {
                pids.push(Pid::new(key)?);
            }
        }
        Ok(pids)
    }

    /// Number of stored records.
    pub fn count(&self) -> StoreResult<usize> {
        self.pids().map(|pids| pids.len())
    }

    // ---------------------------------------------------------------
    // Root object
    // ---------------------------------------------------------------

    /// Pid of the root object, committed or pending.
    pub fn root_pid(&self) -> StoreResult<Option<Pid>> {
        if let Some(pid) = &self.pending_root {
            return Ok(Some(pid.clone()));
        }
        self.assert_open()?;
        match self.map.at_text(&self.config.root_key)? {
            Some(text) => Ok(Some(Pid::new(text)?)),
            None => Ok(None),
        }
    }

    /// Load the root object, or register the one `init` builds as the new
    /// root. A new root is written on the next commit.
    pub fn root_or_insert_with(
        &mut self,
        init: impl FnOnce() -> ObjectRef,
    ) -> StoreResult<ObjectRef> {
        if let Some(pid) = self.root_pid()? {
            if let Some(root) = self.object_for_pid(&pid)? {
                return Ok(root);
            }
            warn!(pid = %pid, "root record missing; creating a new root");
        }
        let root = init();
        let pid = self.register(&root)?;
        self.pending_root = Some(pid);
        Ok(root)
    }

    // ---------------------------------------------------------------
    // Removal and reachability
    // ---------------------------------------------------------------

    /// Drop `pid` from the arena and delete its record on the next commit.
    ///
    /// Returns false if the pid is neither live nor stored.
    pub fn remove(&mut self, pid: &Pid) -> StoreResult<bool> {
        self.assert_open()?;
        let live = self.active.remove(pid);
        let stored = self.map.has_key(pid.as_str())?;
        if let Some(handle) = &live {
            handle.write().meta_mut().detach();
        }
        self.sink.remove(pid);
        if live.is_none() && !stored {
            return Ok(false);
        }
        if stored {
            self.pending_removals.insert(pid.clone());
        }
        debug!(pid = %pid, "object removed");
        Ok(true)
    }

    /// Pids reachable from the root through stored records.
    ///
    /// Reads committed records only. References to missing records are
    /// not included.
    pub fn reachable_pids(&self) -> StoreResult<BTreeSet<Pid>> {
        let Some(root) = self.root_pid()? else {
            return Ok(BTreeSet::new());
        };
        self.reachable_from(&root)
    }

    /// Pids reachable from `start` through stored records.
    pub fn reachable_from(&self, start: &Pid) -> StoreResult<BTreeSet<Pid>> {
        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(pid) = queue.pop_front() {
            if reached.contains(&pid) {
                continue;
            }
            let Some(record) = self.record_for_pid(&pid)? else {
                continue;
            };
            reached.insert(pid);
            let mut refs = BTreeSet::new();
            record.refs_pids(&mut refs);
            queue.extend(refs.into_iter().filter(|p| !reached.contains(p)));
        }
        Ok(reached)
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    /// Write every dirty object in one transaction.
    ///
    /// Blob encoding runs before the transaction opens. On failure the
    /// snapshot is unchanged and every pid stays dirty. Returns the number
    /// of records written.
    pub async fn commit(&mut self) -> StoreResult<usize> {
        self.assert_open()?;
        let dirty = self.sink.take();
        if dirty.is_empty() && self.pending_removals.is_empty() && self.pending_root.is_none() {
            return Ok(0);
        }

        let mut batch = Batch {
            queue: dirty.iter().cloned().collect(),
            ..Batch::default()
        };
        let built = match self.build_batch(&mut batch) {
            Ok(()) => self.prepare_blobs(&mut batch).await,
            Err(e) => Err(e),
        };
        if let Err(e) = built {
            self.redirty(dirty.iter().chain(batch.pids()));
            return Err(e);
        }

        let written = batch.records.len();
        if let Err(e) = self.write_batch(&batch).await {
            self.redirty(dirty.iter().chain(batch.pids()));
            return Err(e);
        }

        for (pid, handle) in &batch.stored {
            if !self.sink.contains(pid) {
                handle.write().meta_mut().set_status(StoreStatus::Persisted);
            }
        }
        self.pending_removals.clear();
        self.pending_root = None;
        info!(records = written, "object pool committed");
        Ok(written)
    }

    /// Serialize queued objects, following first-seen references.
    fn build_batch(&mut self, batch: &mut Batch) -> StoreResult<()> {
        while let Some(pid) = batch.queue.pop_front() {
            if !batch.seen.insert(pid.clone()) {
                continue;
            }
            let Some(handle) = self.active.get(&pid).cloned() else {
                debug!(pid = %pid, "dirty pid no longer live; skipping");
                continue;
            };

            let (already_stored, pending) = {
                let object = handle.read();
                let content_addressed = self.minter.is_content_addressed(&**object);
                (
                    content_addressed && self.map.has_key(pid.as_str())?,
                    object.pending_preparation(),
                )
            };
            if already_stored {
                // Same bytes, same pid: the existing record is this record.
                batch.stored.push((pid, handle));
                continue;
            }
            if let Some(data) = pending {
                batch.unprepared.push((pid, handle, data));
                continue;
            }

            let record = {
                let mut cx =
                    StoreCx::new(&mut self.active, &self.sink, &self.minter, &mut batch.queue);
                handle.read().record_for_store(&mut cx)?
            };
            batch.records.insert(pid.clone(), record);
            batch.stored.push((pid, handle));
        }
        Ok(())
    }

    /// Encode every unprepared blob, then build its record.
    async fn prepare_blobs(&mut self, batch: &mut Batch) -> StoreResult<()> {
        while let Some((pid, handle, data)) = batch.unprepared.pop() {
            let encoded = encode_base64(data).await?;
            handle.write().accept_prepared(encoded);
            let record = {
                let mut cx =
                    StoreCx::new(&mut self.active, &self.sink, &self.minter, &mut batch.queue);
                handle.read().record_for_store(&mut cx)?
            };
            batch.records.insert(pid.clone(), record);
            batch.stored.push((pid, handle));
            self.build_batch(batch)?;
        }
        Ok(())
    }

    async fn write_batch(&mut self, batch: &Batch) -> StoreResult<()> {
        self.map.begin()?;
        let staged = self.stage(batch);
        let result = match staged {
            Ok(()) => self.map.commit().await.map_err(StoreError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.map.revert()?;
            warn!(error = %e, "object pool commit failed");
            return Err(e);
        }
        Ok(())
    }

    fn stage(&mut self, batch: &Batch) -> StoreResult<()> {
        for pid in &self.pending_removals {
            if !batch.records.contains_key(pid) {
                self.map.remove_key(pid.as_str())?;
            }
        }
        for (pid, record) in &batch.records {
            self.map.at_put(pid.as_str(), record.to_json_string()?)?;
        }
        if let Some(root) = &self.pending_root {
            self.map.at_put(&self.config.root_key, root.as_str())?;
        }
        Ok(())
    }

    fn redirty<'a>(&self, pids: impl Iterator<Item = &'a Pid>) {
        for pid in pids {
            if self.active.contains_key(pid) {
                self.sink.insert(pid.clone());
            }
        }
    }

    fn assert_open(&self) -> StoreResult<()> {
        if self.map.is_open() {
            Ok(())
        } else {
            Err(StoreError::NotOpen)
        }
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("folder", &self.map.folder().name())
            .field("active", &self.active.len())
            .field("dirty", &self.sink.len())
            .field("pending_removals", &self.pending_removals.len())
            .finish()
    }
}
