//! Configuration structures for TarnDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default store path when none is given.
pub const DEFAULT_STORE_PATH: &str = "simpleKVStore";

/// Default write buffer capacity in entries.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Storage configuration for a store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the page file; the value heap lives at `<path>-entries`.
    pub path: PathBuf,
    /// Write buffer capacity in entries.
    pub buffer_capacity: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            fsync_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with the given store path and defaults
    /// for everything else.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path of the value heap file.
    pub fn heap_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push("-entries");
        self.path.with_file_name(name)
    }
}
