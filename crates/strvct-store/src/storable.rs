use std::any::Any;
use std::collections::BTreeSet;

use bytes::Bytes;
use strvct_types::{ObjectRecord, Pid, Record};
use tracing::debug;

use crate::context::{LoadCx, StoreCx};
use crate::error::{StoreError, StoreResult};
use crate::meta::StoreMeta;
use crate::slot::SlotValue;

/// Contract between a live object and the object pool.
///
/// Implementors declare their persisted slots once per type through
/// [`stored_slot_names`](Self::stored_slot_names), expose current values
/// through [`stored_slots`](Self::stored_slots), and accept loaded values
/// through [`apply_slot`](Self::apply_slot). The provided
/// `record_for_store` / `load_from_record` pair turns that into the
/// generic `{type, entries}` record; types with a different wire shape
/// (blobs) override both.
pub trait Storable: Any + Send + Sync {
    /// Registered type name, written as the record's `type`.
    fn type_name(&self) -> &'static str;

    fn meta(&self) -> &StoreMeta;

    fn meta_mut(&mut self) -> &mut StoreMeta;

    /// Names of every slot that participates in the record.
    fn stored_slot_names(&self) -> &'static [&'static str];

    /// Current values of the stored slots, in record order.
    fn stored_slots(&self) -> Vec<(&'static str, SlotValue)>;

    /// Set one stored slot from a loaded value.
    fn apply_slot(&mut self, name: &str, value: SlotValue) -> StoreResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Serialize current state. Nested objects become pid tokens and are
    /// queued for storage through `cx`.
    fn record_for_store(&self, cx: &mut StoreCx<'_>) -> StoreResult<Record> {
        if !self.meta().should_store() {
            return Err(StoreError::NotStorable(self.type_name().to_string()));
        }
        let mut record = ObjectRecord::new(self.type_name());
        for (name, value) in self.stored_slots() {
            record.push(name, cx.ref_value(&value)?);
        }
        Ok(Record::Object(record))
    }

    /// Populate slots from `record`, resolving pid tokens through `cx`.
    ///
    /// Entries for slots this type no longer stores are skipped.
    fn load_from_record(&mut self, record: &Record, cx: &mut LoadCx<'_>) -> StoreResult<()> {
        let Record::Object(object) = record else {
            return Err(StoreError::MalformedRecord(format!(
                "{} cannot load a {} record",
                self.type_name(),
                record.type_name()
            )));
        };
        let names = self.stored_slot_names();
        for (key, value) in &object.entries {
            if !names.iter().any(|name| *name == key.as_str()) {
                debug!(type_name = self.type_name(), slot = %key, "skipping unknown slot");
                continue;
            }
            let value = cx.unref_value(value)?;
            self.apply_slot(key, value)?;
        }
        Ok(())
    }

    /// Add the pids of every object this one references to `pids`.
    fn refs_pids(&self, pids: &mut BTreeSet<Pid>) {
        for (_, value) in self.stored_slots() {
            match value {
                SlotValue::Ref(handle) => pids.extend(handle.pid().cloned()),
                SlotValue::Refs(handles) => {
                    pids.extend(handles.iter().filter_map(|h| h.pid().cloned()))
                }
                SlotValue::Value(_) => {}
            }
        }
    }

    /// Post-load hook, run once the outermost load has finished.
    fn did_load_from_store(&mut self) {}

    /// Mutation hook: call after changing slot `slot`.
    fn did_update_slot(&mut self, slot: &str) {
        if self.stored_slot_names().iter().any(|name| *name == slot) {
            self.meta_mut().mark_dirty();
        }
    }

    fn should_store(&self) -> bool {
        self.meta().should_store()
    }

    fn set_should_store(&mut self, should_store: bool) {
        self.meta_mut().set_should_store(should_store);
    }

    /// Bytes whose hash is this object's pid, for content-addressed types.
    fn content_bytes(&self) -> Option<&[u8]> {
        None
    }

    /// Data that must be encoded before `record_for_store` can run.
    fn pending_preparation(&self) -> Option<Bytes> {
        None
    }

    /// Accept the base64 encoding of the data from `pending_preparation`.
    fn accept_prepared(&mut self, _base64: String) {}
}
