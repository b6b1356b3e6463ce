use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::pid::Pid;

/// Type name carried by every blob record.
pub const BLOB_TYPE_NAME: &str = "Blob";

/// Key of the single field in a reference token: `{"*": "<pid>"}`.
const REF_KEY: &str = "*";

/// Encode a pid as a reference token.
pub fn pid_token(pid: &Pid) -> Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(REF_KEY.to_string(), Value::String(pid.as_str().to_string()));
    Value::Object(map)
}

/// Decode a reference token. Returns `None` for any other value.
pub fn token_pid(value: &Value) -> Option<Pid> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let key = map.get(REF_KEY)?.as_str()?;
    Pid::new(key).ok()
}

/// Serialized form of a generic object: type name plus ordered slot entries.
///
/// Entry values are JSON literals or reference tokens for nested objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    pub entries: Vec<(String, Value)>,
}

impl ObjectRecord {
    /// Create an empty record for the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.entries.push((key.into(), value));
    }

    /// Look up an entry value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Serialized form of a binary blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "dataUrl")]
    pub data_url: String,
}

impl BlobRecord {
    /// Create a blob record around an already-encoded data URL.
    pub fn new(data_url: impl Into<String>) -> Self {
        Self {
            type_name: BLOB_TYPE_NAME.to_string(),
            data_url: data_url.into(),
        }
    }
}

/// The unit written under one pid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Blob(BlobRecord),
    Object(ObjectRecord),
}

impl Record {
    /// The declared type name.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Blob(blob) => &blob.type_name,
            Self::Object(obj) => &obj.type_name,
        }
    }

    /// Serialize to the JSON string stored in a folder.
    pub fn to_json_string(&self) -> Result<String, TypeError> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Parse a stored JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, TypeError> {
        let record: Self =
            serde_json::from_str(s).map_err(|e| TypeError::Serialization(e.to_string()))?;
        if let Self::Blob(blob) = &record {
            if blob.type_name != BLOB_TYPE_NAME {
                return Err(TypeError::MalformedRecord(format!(
                    "dataUrl record with type {}",
                    blob.type_name
                )));
            }
        }
        Ok(record)
    }

    /// Add the pid of every reference token in this record to `pids`.
    ///
    /// Tokens are found at any depth inside entry values.
    pub fn refs_pids(&self, pids: &mut BTreeSet<Pid>) {
        if let Self::Object(obj) = self {
            for (_, value) in &obj.entries {
                collect_tokens(value, pids);
            }
        }
    }
}

fn collect_tokens(value: &Value, pids: &mut BTreeSet<Pid>) {
    if let Some(pid) = token_pid(value) {
        pids.insert(pid);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, pids)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, pids)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pid(s: &str) -> Pid {
        Pid::new(s).unwrap()
    }

    #[test]
    fn object_record_wire_shape() {
        let mut record = ObjectRecord::new("Person");
        record.push("name", json!("Ada"));
        record.push("friend", pid_token(&pid("p2")));
        let json = Record::Object(record).to_json_string().unwrap();
        assert_eq!(
            json,
            r#"{"type":"Person","entries":[["name","Ada"],["friend",{"*":"p2"}]]}"#
        );
    }

    #[test]
    fn blob_record_wire_shape() {
        let record = Record::Blob(BlobRecord::new("data:application/octet-stream;base64,AAE="));
        let json = record.to_json_string().unwrap();
        assert_eq!(
            json,
            r#"{"type":"Blob","dataUrl":"data:application/octet-stream;base64,AAE="}"#
        );
        assert_eq!(Record::from_json_str(&json).unwrap(), record);
    }

    #[test]
    fn parse_object_record() {
        let record =
            Record::from_json_str(r#"{"type":"Node","entries":[["title","x"]]}"#).unwrap();
        assert_eq!(record.type_name(), "Node");
        match record {
            Record::Object(obj) => assert_eq!(obj.get("title"), Some(&json!("x"))),
            Record::Blob(_) => panic!("expected object record"),
        }
    }

    #[test]
    fn data_url_with_wrong_type_is_malformed() {
        let err = Record::from_json_str(r#"{"type":"Person","dataUrl":"x"}"#).unwrap_err();
        assert!(matches!(err, TypeError::MalformedRecord(_)));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let err = Record::from_json_str("not json").unwrap_err();
        assert!(matches!(err, TypeError::Serialization(_)));
    }

    #[test]
    fn token_roundtrip_and_rejects() {
        let token = pid_token(&pid("abc"));
        assert_eq!(token_pid(&token), Some(pid("abc")));
        assert_eq!(token_pid(&json!({"*": "abc", "extra": 1})), None);
        assert_eq!(token_pid(&json!({"*": 5})), None);
        assert_eq!(token_pid(&json!("abc")), None);
    }

    #[test]
    fn refs_pids_finds_nested_tokens() {
        let mut record = ObjectRecord::new("Node");
        record.push("owner", pid_token(&pid("a")));
        record.push("subnodes", json!([pid_token(&pid("b")), pid_token(&pid("c"))]));
        record.push("title", json!("plain"));
        let mut pids = BTreeSet::new();
        Record::Object(record).refs_pids(&mut pids);
        let got: Vec<&str> = pids.iter().map(Pid::as_str).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn blob_has_no_refs() {
        let mut pids = BTreeSet::new();
        Record::Blob(BlobRecord::new("data:,")).refs_pids(&mut pids);
        assert!(pids.is_empty());
    }
}
