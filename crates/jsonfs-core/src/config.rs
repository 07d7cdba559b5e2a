//! Filesystem configuration.
//!
//! Loaded from TOML; every field is optional:
//!
//! ```toml
//! snapshot = "fs.json"
//! create_if_missing = true
//! pretty = false
//!
//! [limits]
//! max_nodes = 65536
//! max_file_size = 67108864
//! max_dir_entries = 4096
//! max_name_len = 255
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default snapshot location, relative to the working directory.
pub const DEFAULT_SNAPSHOT: &str = "fs.json";

/// Capacity ceilings. The whole tree lives in memory with nowhere to spill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of allocated nodes, root included.
    pub max_nodes: usize,
    /// Maximum content length of a single file.
    pub max_file_size: u64,
    /// Maximum number of entries in a single directory.
    pub max_dir_entries: usize,
    /// Maximum entry name length in bytes.
    pub max_name_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_nodes: 64 * 1024,
            max_file_size: 64 * 1024 * 1024,
            max_dir_entries: 4096,
            max_name_len: 255,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Snapshot file read at init and written at teardown.
    pub snapshot: PathBuf,
    /// Start from an empty root when the snapshot file does not exist.
    pub create_if_missing: bool,
    /// Indent the JSON written at teardown.
    pub pretty: bool,
    pub limits: Limits,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            snapshot: PathBuf::from(DEFAULT_SNAPSHOT),
            create_if_missing: false,
            pretty: false,
            limits: Limits::default(),
        }
    }
}

/// Configuration load failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl FsConfig {
    /// Config with a specific snapshot path and defaults elsewhere.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: path.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
