//! Stream preferences: pause and mute-low.
//!
//! Both flags are write-through: every change updates the in-memory value the
//! engine reads synchronously and is persisted under `streamPrefs`. On load the
//! persisted value is read only to surface corruption in the logs; both flags
//! always start `false` so a fresh session never opens with a hidden stream.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{StorageConfig, STREAM_PREFS_KEY};

/// Persisted shape of the preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPreferences {
    #[serde(default)]
    pub is_stream_paused: bool,
    #[serde(default)]
    pub mute_low_while_streaming: bool,
}

pub struct PreferenceStore {
    storage: StorageConfig,
    current: StreamPreferences,
}

impl PreferenceStore {
    pub fn load(storage: StorageConfig) -> Self {
        if let Some(previous) = storage.load_key::<StreamPreferences>(STREAM_PREFS_KEY) {
            debug!(
                paused = previous.is_stream_paused,
                mute_low = previous.mute_low_while_streaming,
                "Ignoring persisted stream preferences; streaming resumes visible"
            );
        }

        Self {
            storage,
            current: StreamPreferences::default(),
        }
    }

    pub fn current(&self) -> StreamPreferences {
        self.current
    }

    pub fn paused(&self) -> bool {
        self.current.is_stream_paused
    }

    pub fn mute_low(&self) -> bool {
        self.current.mute_low_while_streaming
    }

    /// Returns `true` when the value changed.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        if self.current.is_stream_paused == paused {
            return false;
        }
        self.current.is_stream_paused = paused;
        self.persist();
        true
    }

    /// Returns `true` when the value changed.
    pub fn set_mute_low(&mut self, mute_low: bool) -> bool {
        if self.current.mute_low_while_streaming == mute_low {
            return false;
        }
        self.current.mute_low_while_streaming = mute_low;
        self.persist();
        true
    }

    fn persist(&self) {
        if let Err(err) = self.storage.save_key(STREAM_PREFS_KEY, &self.current) {
            warn!(error = %err, "Failed to persist stream preferences");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persisted_flags_are_forced_off_on_load() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        storage
            .save_key(
                STREAM_PREFS_KEY,
                &StreamPreferences {
                    is_stream_paused: true,
                    mute_low_while_streaming: true,
                },
            )
            .unwrap();

        let prefs = PreferenceStore::load(storage);
        assert!(!prefs.paused());
        assert!(!prefs.mute_low());
    }

    #[test]
    fn setters_write_through() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let mut prefs = PreferenceStore::load(storage.clone());

        assert!(prefs.set_paused(true));
        assert!(!prefs.set_paused(true));
        assert!(prefs.set_mute_low(true));

        let stored: StreamPreferences = storage.load_key(STREAM_PREFS_KEY).unwrap();
        assert!(stored.is_stream_paused);
        assert!(stored.mute_low_while_streaming);
    }

    #[test]
    fn write_failure_keeps_in_memory_value() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut prefs = PreferenceStore::load(StorageConfig::with_root(blocker));

        assert!(prefs.set_paused(true));
        assert!(prefs.paused());
    }

    #[test]
    fn corrupt_persisted_prefs_load_as_defaults() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        std::fs::write(storage.key_file(STREAM_PREFS_KEY), "[[[").unwrap();

        let prefs = PreferenceStore::load(storage);
        assert_eq!(prefs.current(), StreamPreferences::default());
    }
}
