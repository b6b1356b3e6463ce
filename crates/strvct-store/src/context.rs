//! Contexts threaded through `record_for_store` and `load_from_record`.
//!
//! [`StoreCx`] turns live references into pid tokens, registering objects
//! it has not seen. [`LoadCx`] turns pid tokens back into live handles,
//! materializing records on first reference.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use strvct_atomic::PersistentAtomicMap;
use strvct_crypto::ContentHasher;
use strvct_types::{pid_token, token_pid, Pid, Record};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{StoreError, StoreResult};
use crate::handle::ObjectRef;
use crate::meta::{DirtySink, StoreStatus};
use crate::registry::TypeRegistry;
use crate::slot::SlotValue;
use crate::storable::Storable;

/// Chooses the pid of a newly registered object.
#[derive(Clone, Debug)]
pub(crate) struct PidMinter {
    content_addressed: bool,
}

impl PidMinter {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        Self {
            content_addressed: config.content_addressed_blobs,
        }
    }

    pub(crate) fn is_content_addressed(&self, object: &dyn Storable) -> bool {
        self.content_addressed && object.content_bytes().is_some()
    }

    pub(crate) fn mint(&self, object: &dyn Storable) -> Pid {
        match object.content_bytes() {
            Some(bytes) if self.content_addressed => ContentHasher::BLOB.pid(bytes),
            _ => Pid::generate(),
        }
    }
}

/// Give `handle` a pid and attach it to the pool's arena and dirty sink.
///
/// Returns the pid and whether the object was newly registered.
pub(crate) fn adopt(
    handle: &ObjectRef,
    active: &mut HashMap<Pid, ObjectRef>,
    sink: &DirtySink,
    minter: &PidMinter,
) -> StoreResult<(Pid, bool)> {
    if let Some(pid) = handle.pid() {
        let pid = pid.clone();
        active.entry(pid.clone()).or_insert_with(|| handle.clone());
        return Ok((pid, false));
    }
    let pid = {
        let object = handle.read();
        if !object.should_store() {
            return Err(StoreError::NotStorable(object.type_name().to_string()));
        }
        minter.mint(&**object)
    };
    let pid = handle.assign_pid(pid);
    if let Some(existing) = active.get(&pid) {
        if !ObjectRef::ptr_eq(existing, handle) {
            // Equal content already lives in the arena; that handle owns the record.
            handle
                .write()
                .meta_mut()
                .attach(handle.downgrade(), sink.clone(), StoreStatus::Persisted);
            debug!(pid = %pid, "duplicate content resolved to existing object");
            return Ok((pid, false));
        }
    }
    handle
        .write()
        .meta_mut()
        .attach(handle.downgrade(), sink.clone(), StoreStatus::Registered);
    active.insert(pid.clone(), handle.clone());
    debug!(pid = %pid, "object registered");
    Ok((pid, true))
}

/// Serialization context: resolves live references to pid tokens.
pub struct StoreCx<'a> {
    active: &'a mut HashMap<Pid, ObjectRef>,
    sink: &'a DirtySink,
    minter: &'a PidMinter,
    queue: &'a mut VecDeque<Pid>,
}

impl<'a> StoreCx<'a> {
    pub(crate) fn new(
        active: &'a mut HashMap<Pid, ObjectRef>,
        sink: &'a DirtySink,
        minter: &'a PidMinter,
        queue: &'a mut VecDeque<Pid>,
    ) -> Self {
        Self {
            active,
            sink,
            minter,
            queue,
        }
    }

    /// Record form of a slot value: literals pass through, references
    /// become tokens.
    pub fn ref_value(&mut self, value: &SlotValue) -> StoreResult<Value> {
        match value {
            SlotValue::Value(value) => Ok(value.clone()),
            SlotValue::Ref(handle) => self.ref_object(handle),
            SlotValue::Refs(handles) => handles
                .iter()
                .map(|handle| self.ref_object(handle))
                .collect::<StoreResult<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Pid token for `handle`. An object seen for the first time is
    /// registered and queued so it is stored in the same commit.
    pub fn ref_object(&mut self, handle: &ObjectRef) -> StoreResult<Value> {
        let (pid, fresh) = adopt(handle, self.active, self.sink, self.minter)?;
        if fresh {
            self.queue.push_back(pid.clone());
        }
        Ok(pid_token(&pid))
    }
}

/// Deserialization context: resolves pid tokens to live handles.
pub struct LoadCx<'a> {
    active: &'a mut HashMap<Pid, ObjectRef>,
    map: &'a PersistentAtomicMap,
    registry: &'a TypeRegistry,
    sink: &'a DirtySink,
    root_key: &'a str,
    touched: Vec<Pid>,
    loaded: Vec<ObjectRef>,
}

impl<'a> LoadCx<'a> {
    pub(crate) fn new(
        active: &'a mut HashMap<Pid, ObjectRef>,
        map: &'a PersistentAtomicMap,
        registry: &'a TypeRegistry,
        sink: &'a DirtySink,
        root_key: &'a str,
    ) -> Self {
        Self {
            active,
            map,
            registry,
            sink,
            root_key,
            touched: Vec::new(),
            loaded: Vec::new(),
        }
    }

    /// Live handle for `pid`, loading its record if needed.
    ///
    /// The placeholder joins the arena before its slots are loaded, so a
    /// cycle back to it resolves to the same handle. Missing records and
    /// unknown or non-storable types yield `None`.
    pub fn object_for_pid(&mut self, pid: &Pid) -> StoreResult<Option<ObjectRef>> {
        if let Some(handle) = self.active.get(pid) {
            return Ok(Some(handle.clone()));
        }
        if pid.as_str() == self.root_key {
            return Ok(None);
        }
        let record = match self.map.at_text(pid.as_str())? {
            Some(text) => Record::from_json_str(text)?,
            None => {
                warn!(pid = %pid, "reference to missing record");
                return Ok(None);
            }
        };
        let Some(object) = self.registry.instance_from_record(&record) else {
            return Ok(None);
        };

        let handle = ObjectRef::from_box(object);
        let pid = handle.assign_pid(pid.clone());
        handle
            .write()
            .meta_mut()
            .attach(handle.downgrade(), self.sink.clone(), StoreStatus::Loading);
        self.active.insert(pid.clone(), handle.clone());
        self.touched.push(pid.clone());

        handle.write().load_from_record(&record, self)?;
        debug!(pid = %pid, type_name = record.type_name(), "object loaded");
        self.loaded.push(handle.clone());
        Ok(Some(handle))
    }

    /// Slot form of a record value: tokens and token lists become handles,
    /// everything else passes through.
    pub fn unref_value(&mut self, value: &Value) -> StoreResult<SlotValue> {
        if let Some(pid) = token_pid(value) {
            return Ok(self
                .object_for_pid(&pid)?
                .map_or_else(SlotValue::null, SlotValue::Ref));
        }
        if let Value::Array(items) = value {
            if !items.is_empty() && items.iter().all(|item| token_pid(item).is_some()) {
                let mut handles = Vec::with_capacity(items.len());
                for pid in items.iter().filter_map(token_pid) {
                    if let Some(handle) = self.object_for_pid(&pid)? {
                        handles.push(handle);
                    }
                }
                return Ok(SlotValue::Refs(handles));
            }
        }
        Ok(SlotValue::Value(value.clone()))
    }

    /// Pids inserted into the arena so far, and the handles fully loaded.
    pub(crate) fn into_parts(self) -> (Vec<Pid>, Vec<ObjectRef>) {
        (self.touched, self.loaded)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::blob::BlobObject;
    use crate::node::StorableNode;
    use strvct_kv::InMemoryFolder;

    /// Owns everything a context borrows.
    pub(crate) struct Scratch {
        pub(crate) active: HashMap<Pid, ObjectRef>,
        pub(crate) sink: DirtySink,
        pub(crate) minter: PidMinter,
        pub(crate) queue: VecDeque<Pid>,
        map: PersistentAtomicMap,
        registry: TypeRegistry,
    }

    impl Scratch {
        pub(crate) fn new() -> Self {
            Self {
                active: HashMap::new(),
                sink: DirtySink::default(),
                minter: PidMinter::new(&PoolConfig::default()),
                queue: VecDeque::new(),
                map: PersistentAtomicMap::new(Arc::new(InMemoryFolder::new("scratch"))),
                registry: TypeRegistry::with_builtins(),
            }
        }

        pub(crate) fn store_cx(&mut self) -> StoreCx<'_> {
            StoreCx::new(&mut self.active, &self.sink, &self.minter, &mut self.queue)
        }

        pub(crate) fn load_cx(&mut self) -> LoadCx<'_> {
            LoadCx::new(
                &mut self.active,
                &self.map,
                &self.registry,
                &self.sink,
                "_rootPid",
            )
        }
    }

    #[test]
    fn ref_object_registers_once() {
        let mut scratch = Scratch::new();
        let child = ObjectRef::new(StorableNode::new("c"));
        let (first, second) = {
            let mut cx = scratch.store_cx();
            (cx.ref_object(&child).unwrap(), cx.ref_object(&child).unwrap())
        };
        assert_eq!(first, second);
        assert_eq!(token_pid(&first).as_ref(), child.pid());
        assert_eq!(scratch.queue.len(), 1);
        assert_eq!(scratch.active.len(), 1);
        assert_eq!(child.read().meta().status(), StoreStatus::Registered);
    }

    #[test]
    fn refs_become_token_array() {
        let mut scratch = Scratch::new();
        let a = ObjectRef::new(StorableNode::new("a"));
        let b = ObjectRef::new(StorableNode::new("b"));
        let value = scratch
            .store_cx()
            .ref_value(&SlotValue::Refs(vec![a.clone(), b.clone()]))
            .unwrap();
        let tokens = value.as_array().unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(token_pid(&tokens[1]).as_ref(), b.pid());
    }

    #[test]
    fn non_storable_reference_is_rejected() {
        let mut scratch = Scratch::new();
        let mut node = StorableNode::new("scratchpad");
        node.set_should_store(false);
        let handle = ObjectRef::new(node);
        let err = scratch.store_cx().ref_object(&handle).unwrap_err();
        assert!(matches!(err, StoreError::NotStorable(ref t) if t == "StorableNode"));
        assert!(handle.pid().is_none());
    }

    #[test]
    fn blob_pid_is_content_hash() {
        let mut scratch = Scratch::new();
        let a = ObjectRef::new(BlobObject::new(&b"same bytes"[..]));
        let b = ObjectRef::new(BlobObject::new(&b"same bytes"[..]));
        let mut cx = scratch.store_cx();
        let ta = cx.ref_object(&a).unwrap();
        let tb = cx.ref_object(&b).unwrap();
        assert_eq!(ta, tb);
        assert_eq!(a.pid(), Some(&ContentHasher::BLOB.pid(b"same bytes")));
        assert_eq!(scratch.active.len(), 1);
        // Only the first handle is queued; the duplicate is settled.
        assert_eq!(scratch.queue.len(), 1);
        assert_eq!(a.read().meta().status(), StoreStatus::Registered);
        assert_eq!(b.read().meta().status(), StoreStatus::Persisted);
        assert!(!b.read().meta().is_dirty());
    }

    #[test]
    fn literals_pass_through_unref() {
        let mut scratch = Scratch::new();
        let mut cx = scratch.load_cx();
        let value = cx.unref_value(&serde_json::json!({"a": 1})).unwrap();
        assert!(matches!(value, SlotValue::Value(Value::Object(_))));
        let value = cx.unref_value(&serde_json::json!([])).unwrap();
        assert!(matches!(value, SlotValue::Value(Value::Array(ref a)) if a.is_empty()));
    }
}
