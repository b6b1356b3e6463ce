use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use strvct_types::Pid;

use crate::handle::{ObjectRef, WeakObjectRef};

/// Storage lifecycle of one object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreStatus {
    /// Never handed to a pool.
    #[default]
    Transient,
    /// Has a pid, record not yet written.
    Registered,
    /// Record written and clean.
    Persisted,
    /// A stored slot changed after the last write.
    Dirty,
    /// Placeholder created from a record; slots not populated yet.
    Loading,
    /// Slots populated and `did_load_from_store` has run.
    Loaded,
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Registered => "registered",
            Self::Persisted => "persisted",
            Self::Dirty => "dirty",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        };
        f.write_str(s)
    }
}

/// Set of pids mutated since the last commit, shared by a pool and every
/// object it has registered.
#[derive(Clone, Default)]
pub struct DirtySink(Arc<Mutex<BTreeSet<Pid>>>);

impl DirtySink {
    pub fn insert(&self, pid: Pid) {
        self.0.lock().expect("lock poisoned").insert(pid);
    }

    pub fn remove(&self, pid: &Pid) -> bool {
        self.0.lock().expect("lock poisoned").remove(pid)
    }

    pub fn contains(&self, pid: &Pid) -> bool {
        self.0.lock().expect("lock poisoned").contains(pid)
    }

    /// Drain the set.
    pub fn take(&self) -> BTreeSet<Pid> {
        std::mem::take(&mut *self.0.lock().expect("lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.0.lock().expect("lock poisoned").iter().cloned().collect()
    }
}

impl fmt::Debug for DirtySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtySink").field("len", &self.len()).finish()
    }
}

/// Per-object storage bookkeeping, embedded in every storable type.
///
/// The pid itself lives on the object's handle; the meta reaches it through
/// the weak self-reference set when a pool adopts the object.
#[derive(Debug)]
pub struct StoreMeta {
    should_store: bool,
    this: Option<WeakObjectRef>,
    sink: Option<DirtySink>,
    status: StoreStatus,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            should_store: true,
            this: None,
            sink: None,
            status: StoreStatus::Transient,
        }
    }
}

impl StoreMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_store(&self) -> bool {
        self.should_store
    }

    pub fn set_should_store(&mut self, should_store: bool) {
        self.should_store = should_store;
    }

    /// Pid of the owning handle, once a pool has adopted the object.
    pub fn pid(&self) -> Option<Pid> {
        self.this_ref().and_then(|this| this.pid().cloned())
    }

    pub fn status(&self) -> StoreStatus {
        self.status
    }

    /// Handle to the object owning this meta, once a pool has adopted it.
    pub fn this_ref(&self) -> Option<ObjectRef> {
        self.this.as_ref().and_then(WeakObjectRef::upgrade)
    }

    /// Record a mutation of a stored slot.
    ///
    /// No-op for objects that should not store, have no pid yet, or are in
    /// the middle of loading.
    pub fn mark_dirty(&mut self) {
        if !self.should_store || self.status == StoreStatus::Loading {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        if let Some(pid) = self.pid() {
            self.status = StoreStatus::Dirty;
            sink.insert(pid);
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.status, StoreStatus::Dirty | StoreStatus::Registered)
    }

    pub(crate) fn attach(&mut self, this: WeakObjectRef, sink: DirtySink, status: StoreStatus) {
        self.this = Some(this);
        self.sink = Some(sink);
        self.status = status;
    }

    pub(crate) fn detach(&mut self) {
        self.sink = None;
        self.status = StoreStatus::Transient;
    }

    pub(crate) fn set_status(&mut self, status: StoreStatus) {
        self.status = status;
    }
}
