use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, KvResult};

/// Flush strategy for journal-backed folders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every committed transaction.
    EveryWrite,
    /// Flush to the OS and let it decide when to hit the disk.
    #[default]
    OsDefault,
}

/// Configuration for a folder and the atomic map layered over it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    /// Folder name (also the journal file stem).
    pub folder: String,
    /// Journal flush strategy.
    pub sync_mode: SyncMode,
    /// Reject binary values in atomic maps over this folder.
    pub strict_strings: bool,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            folder: "objects".to_string(),
            sync_mode: SyncMode::default(),
            strict_strings: true,
        }
    }
}

impl KvConfig {
    /// Parse from TOML. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> KvResult<Self> {
        toml::from_str(s).map_err(|e| KvError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> KvResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> KvResult<String> {
        toml::to_string(self).map_err(|e| KvError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = KvConfig::default();
        assert_eq!(c.folder, "objects");
        assert_eq!(c.sync_mode, SyncMode::OsDefault);
        assert!(c.strict_strings);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c = KvConfig::from_toml_str("sync_mode = \"every_write\"\n").unwrap();
        assert_eq!(c.sync_mode, SyncMode::EveryWrite);
        assert_eq!(c.folder, "objects");
    }

    #[test]
    fn toml_roundtrip() {
        let c = KvConfig {
            folder: "blobs".into(),
            sync_mode: SyncMode::EveryWrite,
            strict_strings: false,
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(KvConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = KvConfig::from_toml_str("sync_mode = 3").unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "folder = \"notes\"\n").unwrap();
        assert_eq!(KvConfig::load(&path).unwrap().folder, "notes");
    }
}
