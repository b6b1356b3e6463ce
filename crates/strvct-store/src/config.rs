use serde::{Deserialize, Serialize};

/// Object pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Reserved folder key holding the root object's pid.
    pub root_key: String,
    /// Derive blob pids from a hash of their bytes.
    pub content_addressed_blobs: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            root_key: "_rootPid".to_string(),
            content_addressed_blobs: true,
        }
    }
}
