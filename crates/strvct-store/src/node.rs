use std::any::Any;

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::handle::{ObjectRef, WeakObjectRef};
use crate::meta::StoreMeta;
use crate::slot::SlotValue;
use crate::storable::Storable;

const TITLE: &str = "title";
const SUBTITLE: &str = "subtitle";
const SUBNODES: &str = "subnodes";

/// Titled tree node with an ordered list of child nodes.
///
/// `title` and `subtitle` are always stored. `subnodes` is stored only
/// while `should_store_subnodes` is set. The parent link is a weak,
/// non-stored back-reference, rebuilt from `subnodes` after a load.
pub struct StorableNode {
    meta: StoreMeta,
    title: String,
    subtitle: Option<String>,
    subnodes: Vec<ObjectRef>,
    should_store_subnodes: bool,
    parent: WeakObjectRef,
}

impl Default for StorableNode {
    fn default() -> Self {
        Self::new("")
    }
}

impl StorableNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            meta: StoreMeta::new(),
            title: title.into(),
            subtitle: None,
            subnodes: Vec::new(),
            should_store_subnodes: true,
            parent: WeakObjectRef::default(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        if title != self.title {
            self.title = title;
            self.did_update_slot(TITLE);
        }
    }

    pub fn subtitle(&self) -> Option<&str> {
        self.subtitle.as_deref()
    }

    pub fn set_subtitle(&mut self, subtitle: Option<String>) {
        if subtitle != self.subtitle {
            self.subtitle = subtitle;
            self.did_update_slot(SUBTITLE);
        }
    }

    pub fn subnodes(&self) -> &[ObjectRef] {
        &self.subnodes
    }

    pub fn subnode_count(&self) -> usize {
        self.subnodes.len()
    }

    pub fn should_store_subnodes(&self) -> bool {
        self.should_store_subnodes
    }

    /// Toggling this changes the record shape, so it counts as a slot write.
    pub fn set_should_store_subnodes(&mut self, should_store: bool) {
        if should_store != self.should_store_subnodes {
            self.should_store_subnodes = should_store;
            self.did_update_slot(SUBNODES);
        }
    }

    /// Append a child without touching its parent link.
    pub fn push_subnode(&mut self, child: ObjectRef) {
        self.subnodes.push(child);
        self.did_update_slot(SUBNODES);
    }

    /// Remove `child` if present. Returns whether it was a subnode.
    pub fn remove_subnode(&mut self, child: &ObjectRef) -> bool {
        let before = self.subnodes.len();
        self.subnodes.retain(|s| !ObjectRef::ptr_eq(s, child));
        let removed = self.subnodes.len() != before;
        if removed {
            self.did_update_slot(SUBNODES);
        }
        removed
    }

    pub fn parent_node(&self) -> Option<ObjectRef> {
        self.parent.upgrade()
    }

    pub fn set_parent_node(&mut self, parent: WeakObjectRef) {
        self.parent = parent;
    }

    /// Append `child` to `parent` and point the child's parent link back.
    ///
    /// Both handles must hold `StorableNode`s.
    pub fn add_subnode(parent: &ObjectRef, child: ObjectRef) -> StoreResult<()> {
        if !parent.is::<StorableNode>() {
            return Err(StoreError::invalid_slot(SUBNODES, "parent is not a StorableNode"));
        }
        child
            .with_mut(|node: &mut StorableNode| node.set_parent_node(parent.downgrade()))
            .ok_or_else(|| StoreError::invalid_slot(SUBNODES, "child is not a StorableNode"))?;
        parent.with_mut(|node: &mut StorableNode| node.push_subnode(child));
        Ok(())
    }
}

impl Storable for StorableNode {
    fn type_name(&self) -> &'static str {
        "StorableNode"
    }

    fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut StoreMeta {
        &mut self.meta
    }

    fn stored_slot_names(&self) -> &'static [&'static str] {
        &[TITLE, SUBTITLE, SUBNODES]
    }

    fn stored_slots(&self) -> Vec<(&'static str, SlotValue)> {
        let mut slots = vec![
            (TITLE, SlotValue::from(self.title.as_str())),
            (SUBTITLE, SlotValue::from(self.subtitle.clone())),
        ];
        if self.should_store_subnodes {
            slots.push((SUBNODES, SlotValue::Refs(self.subnodes.clone())));
        }
        slots
    }

    fn apply_slot(&mut self, name: &str, value: SlotValue) -> StoreResult<()> {
        match name {
            TITLE => self.title = value.into_string(name)?,
            SUBTITLE => self.subtitle = value.into_opt_string(name)?,
            SUBNODES => self.subnodes = value.into_refs(name)?,
            _ => return Err(StoreError::invalid_slot(name, "not a stored slot")),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn did_load_from_store(&mut self) {
        let Some(this) = self.meta.this_ref() else {
            return;
        };
        let weak = this.downgrade();
        for child in &self.subnodes {
            if ObjectRef::ptr_eq(child, &this) {
                continue;
            }
            let linked = child.with_mut(|node: &mut StorableNode| node.set_parent_node(weak.clone()));
            if linked.is_none() {
                warn!(child = ?child.pid(), "subnode is not a StorableNode");
            }
        }
    }
}

impl std::fmt::Debug for StorableNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorableNode")
            .field("pid", &self.meta.pid())
            .field("title", &self.title)
            .field("subnodes", &self.subnodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::Scratch;
    use serde_json::json;
    use strvct_types::{pid_token, Record};

    #[test]
    fn record_shape() {
        let child = ObjectRef::new(StorableNode::new("child"));
        let mut node = StorableNode::new("root");
        node.set_subtitle(Some("sub".into()));
        node.push_subnode(child.clone());

        let mut scratch = Scratch::new();
        let record = node.record_for_store(&mut scratch.store_cx()).unwrap();
        let Record::Object(record) = record else {
            panic!("expected object record");
        };
        assert_eq!(record.type_name, "StorableNode");
        assert_eq!(record.get("title"), Some(&json!("root")));
        assert_eq!(record.get("subtitle"), Some(&json!("sub")));
        let pid = child.pid().unwrap();
        assert_eq!(record.get("subnodes"), Some(&json!([pid_token(pid)])));
    }

    #[test]
    fn record_is_a_pure_function_of_state() {
        let node = StorableNode::new("same");
        let mut scratch = Scratch::new();
        let a = node.record_for_store(&mut scratch.store_cx()).unwrap();
        let b = node.record_for_store(&mut scratch.store_cx()).unwrap();
        assert_eq!(a.to_json_string().unwrap(), b.to_json_string().unwrap());
    }

    #[test]
    fn subnodes_omitted_when_not_stored() {
        let mut node = StorableNode::new("n");
        node.set_should_store_subnodes(false);
        node.push_subnode(ObjectRef::new(StorableNode::new("c")));
        let slots: Vec<_> = node.stored_slots().into_iter().map(|(n, _)| n).collect();
        assert_eq!(slots, vec!["title", "subtitle"]);
    }

    #[test]
    fn add_subnode_links_parent() {
        let parent = ObjectRef::new(StorableNode::new("p"));
        let child = ObjectRef::new(StorableNode::new("c"));
        StorableNode::add_subnode(&parent, child.clone()).unwrap();

        let back = child.with(|n: &StorableNode| n.parent_node()).flatten().unwrap();
        assert!(ObjectRef::ptr_eq(&back, &parent));
        assert_eq!(parent.with(|n: &StorableNode| n.subnode_count()), Some(1));

        assert!(parent.with_mut(|n: &mut StorableNode| n.remove_subnode(&child)).unwrap());
        assert_eq!(parent.with(|n: &StorableNode| n.subnode_count()), Some(0));
    }

    #[test]
    fn apply_slot_validates_shape() {
        let mut node = StorableNode::default();
        node.apply_slot("title", SlotValue::from("t")).unwrap();
        node.apply_slot("subtitle", SlotValue::null()).unwrap();
        node.apply_slot("subnodes", SlotValue::from(json!([]))).unwrap();
        assert_eq!(node.title(), "t");
        assert!(node.subtitle().is_none());
        assert!(node.apply_slot("title", SlotValue::from(json!(1))).is_err());
        assert!(node.apply_slot("bogus", SlotValue::null()).is_err());
    }

    #[test]
    fn setters_only_dirty_on_change() {
        let sink = crate::meta::DirtySink::default();
        let handle = ObjectRef::new(StorableNode::new("same"));
        handle.assign_pid(strvct_types::Pid::new("p").unwrap());
        handle.write().meta_mut().attach(
            handle.downgrade(),
            sink.clone(),
            crate::meta::StoreStatus::Persisted,
        );
        handle.with_mut(|n: &mut StorableNode| n.set_title("same"));
        assert!(sink.is_empty());
        handle.with_mut(|n: &mut StorableNode| n.set_title("changed"));
        assert_eq!(sink.len(), 1);
    }
}
