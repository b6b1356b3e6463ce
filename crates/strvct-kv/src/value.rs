use std::fmt;

use serde::{Deserialize, Serialize};

/// A value stored under a folder key: text (JSON records) or raw binary.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KvValue {
    Text(String),
    Binary(Vec<u8>),
}

impl KvValue {
    /// The text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// The raw bytes of either variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Returns `true` for text values.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

impl From<String> for KvValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for KvValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for KvValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<&[u8]> for KvValue {
    fn from(b: &[u8]) -> Self {
        Self::Binary(b.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessors() {
        let v = KvValue::from("bar");
        assert!(v.is_text());
        assert_eq!(v.as_text(), Some("bar"));
        assert_eq!(v.as_bytes(), b"bar");
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn binary_accessors() {
        let v = KvValue::from(vec![0u8, 1, 2]);
        assert!(!v.is_text());
        assert_eq!(v.as_text(), None);
        assert_eq!(format!("{v:?}"), "Binary(3 bytes)");
    }
}
