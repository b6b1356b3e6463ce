use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::handle::ObjectRef;

/// Value of one stored slot, as seen by a storable type.
///
/// JSON-primitive slots travel as [`SlotValue::Value`]. References to other
/// storable objects travel as handles and are written as pid tokens.
#[derive(Clone, Debug)]
pub enum SlotValue {
    Value(Value),
    Ref(ObjectRef),
    Refs(Vec<ObjectRef>),
}

impl SlotValue {
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// The JSON value of a literal slot.
    pub fn into_json(self, slot: &str) -> StoreResult<Value> {
        match self {
            Self::Value(value) => Ok(value),
            _ => Err(StoreError::invalid_slot(slot, "expected a literal, got a reference")),
        }
    }

    pub fn into_string(self, slot: &str) -> StoreResult<String> {
        match self.into_json(slot)? {
            Value::String(s) => Ok(s),
            other => Err(StoreError::invalid_slot(slot, format!("expected a string, got {other}"))),
        }
    }

    /// A string slot that may be `null`.
    pub fn into_opt_string(self, slot: &str) -> StoreResult<Option<String>> {
        if self.is_null() {
            return Ok(None);
        }
        self.into_string(slot).map(Some)
    }

    pub fn into_bool(self, slot: &str) -> StoreResult<bool> {
        match self.into_json(slot)? {
            Value::Bool(b) => Ok(b),
            other => Err(StoreError::invalid_slot(slot, format!("expected a bool, got {other}"))),
        }
    }

    /// A single reference; `null` reads as `None`.
    pub fn into_ref(self, slot: &str) -> StoreResult<Option<ObjectRef>> {
        match self {
            Self::Ref(handle) => Ok(Some(handle)),
            Self::Value(Value::Null) => Ok(None),
            _ => Err(StoreError::invalid_slot(slot, "expected a reference")),
        }
    }

    /// A list of references; `null` and `[]` read as empty.
    pub fn into_refs(self, slot: &str) -> StoreResult<Vec<ObjectRef>> {
        match self {
            Self::Refs(handles) => Ok(handles),
            Self::Ref(handle) => Ok(vec![handle]),
            Self::Value(Value::Null) => Ok(Vec::new()),
            Self::Value(Value::Array(items)) if items.is_empty() => Ok(Vec::new()),
            _ => Err(StoreError::invalid_slot(slot, "expected a list of references")),
        }
    }
}

impl From<Value> for SlotValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for SlotValue {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<&str> for SlotValue {
    fn from(s: &str) -> Self {
        Self::Value(Value::String(s.to_string()))
    }
}

impl From<bool> for SlotValue {
    fn from(b: bool) -> Self {
        Self::Value(Value::Bool(b))
    }
}

impl From<Option<String>> for SlotValue {
    fn from(s: Option<String>) -> Self {
        s.map_or_else(Self::null, Self::from)
    }
}

impl From<ObjectRef> for SlotValue {
    fn from(handle: ObjectRef) -> Self {
        Self::Ref(handle)
    }
}

impl From<Option<ObjectRef>> for SlotValue {
    fn from(handle: Option<ObjectRef>) -> Self {
        handle.map_or_else(Self::null, Self::Ref)
    }
}

impl From<Vec<ObjectRef>> for SlotValue {
    fn from(handles: Vec<ObjectRef>) -> Self {
        Self::Refs(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StorableNode;
    use serde_json::json;

    #[test]
    fn literal_conversions() {
        assert_eq!(SlotValue::from("a").into_string("s").unwrap(), "a");
        assert_eq!(SlotValue::from(None::<String>).into_opt_string("s").unwrap(), None);
        assert!(SlotValue::from(true).into_bool("b").unwrap());
        let err = SlotValue::from(json!(3)).into_string("title").unwrap_err();
        assert!(matches!(err, StoreError::InvalidSlot { ref slot, .. } if slot == "title"));
    }

    #[test]
    fn empty_array_reads_as_empty_refs() {
        assert!(SlotValue::from(json!([])).into_refs("subnodes").unwrap().is_empty());
        assert!(SlotValue::null().into_refs("subnodes").unwrap().is_empty());
        assert!(SlotValue::from(json!([1])).into_refs("subnodes").is_err());
    }

    #[test]
    fn ref_conversions() {
        let handle = ObjectRef::new(StorableNode::new("n"));
        let got = SlotValue::from(handle.clone()).into_ref("r").unwrap().unwrap();
        assert!(ObjectRef::ptr_eq(&got, &handle));
        assert!(SlotValue::from(None::<ObjectRef>).into_ref("r").unwrap().is_none());
        assert!(SlotValue::from(handle).into_json("r").is_err());
    }
}
