//! Storage configuration and path management for the dashboard.
//!
//! `StorageConfig` owns every path the client writes to, so tests can inject a
//! temp directory and production code never hard-codes locations.
//!
//! Client-side state lives under well-known keys, one JSON file per key:
//!
//! - `incidentFilters` → `incidentFilters.json`
//! - `streamPrefs` → `streamPrefs.json`
//!
//! Reads are forgiving (missing or corrupt files yield `None` and a warning);
//! writes are atomic (temp file + rename) and report `PersistenceWriteFailed`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, SyncError};

pub const FILTERS_KEY: &str = "incidentFilters";
pub const STREAM_PREFS_KEY: &str = "streamPrefs";

/// Central configuration for all dashboard storage paths.
///
/// Production code uses `StorageConfig::default()` which points to `~/.incident-dash/`.
/// Tests use `StorageConfig::with_root(temp_dir)` for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(".incident-dash"))
            .unwrap_or_else(|| std::env::temp_dir().join("incident-dash"));
        Self { root }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to the JSON file backing a well-known key.
    pub fn key_file(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Path to config.toml (API endpoint, timeouts, retry policy).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to logs/ directory (rolling log files).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Key-Value Persistence
    // ─────────────────────────────────────────────────────────────────────────────

    /// Loads the value stored under `key`. Missing → `None`. Corrupt JSON is
    /// discarded with a warning and also yields `None`.
    pub fn load_key<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.key_file(key);
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(error = %err, key, "Failed to read persisted state; using defaults");
                return None;
            }
        };

        if content.trim().is_empty() {
            return None;
        }

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    error = %err,
                    key,
                    path = %path.display(),
                    "Discarding corrupt persisted state"
                );
                None
            }
        }
    }

    /// Atomically writes `value` under `key`.
    pub fn save_key<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_file(key);
        let write_failed = |details: String| SyncError::PersistenceWriteFailed {
            path: path.clone(),
            details,
        };

        let content = serde_json::to_string_pretty(value)
            .map_err(|err| write_failed(format!("Failed to serialize: {}", err)))?;

        fs_err::create_dir_all(&self.root)
            .map_err(|err| write_failed(format!("Failed to create storage dir: {}", err)))?;

        let mut temp_file = NamedTempFile::new_in(&self.root)
            .map_err(|err| write_failed(format!("Temp file error: {}", err)))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| write_failed(format!("Failed to write temp file: {}", err)))?;
        temp_file
            .flush()
            .map_err(|err| write_failed(format!("Failed to flush temp file: {}", err)))?;
        temp_file
            .persist(&path)
            .map_err(|err| write_failed(format!("Failed to commit file: {}", err.error)))?;

        Ok(())
    }
}
