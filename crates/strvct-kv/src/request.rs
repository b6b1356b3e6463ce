use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::KvValue;

/// What a queued request does to its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxAction {
    /// Insert-only: fails if the key already exists.
    Add,
    /// Upsert.
    Update,
    /// Delete (no-op if absent).
    Remove,
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// One request queued on a transaction, tagged with action and key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub action: TxAction,
    pub key: String,
    pub value: Option<KvValue>,
}

impl TxRequest {
    pub fn add(key: impl Into<String>, value: KvValue) -> Self {
        Self {
            action: TxAction::Add,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn update(key: impl Into<String>, value: KvValue) -> Self {
        Self {
            action: TxAction::Update,
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            action: TxAction::Remove,
            key: key.into(),
            value: None,
        }
    }
}

impl fmt::Display for TxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_tags_action_and_key() {
        assert_eq!(TxRequest::add("k", "v".into()).to_string(), "add:k");
        assert_eq!(TxRequest::update("k", "v".into()).to_string(), "update:k");
        assert_eq!(TxRequest::remove("k").to_string(), "remove:k");
    }

    #[test]
    fn remove_carries_no_value() {
        assert!(TxRequest::remove("k").value.is_none());
    }
}
