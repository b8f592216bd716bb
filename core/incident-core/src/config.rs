//! Configuration loading for the dashboard.
//!
//! Reads `config.toml` from the storage root. A missing file yields
//! defaults; a malformed one is an error so a typo never silently points the
//! client at the wrong server. `INCIDENT_DASH_API_URL` overrides the base URL.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use incident_protocol::{clamp_limit, DEFAULT_PAGE_LIMIT};

pub const API_URL_ENV: &str = "INCIDENT_DASH_API_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/incidents";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_TOP_THRESHOLD_PX: f64 = 16.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub table: TableConfig,
    pub viewport: ViewportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Appended to `api.base_url`.
    pub path: String,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            path: "/stream".to_string(),
            retry_initial_ms: 1_000,
            retry_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub page_limit: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub top_threshold_px: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            top_threshold_px: DEFAULT_TOP_THRESHOLD_PX,
        }
    }
}

impl DashConfig {
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.api.base_url.trim_end_matches('/'),
            self.stream.path.trim_start_matches('/')
        )
    }

    pub fn page_limit(&self) -> u32 {
        clamp_limit(self.table.page_limit)
    }
}

/// Loads the config file at `path`, falling back to defaults when it is absent.
pub fn load_config(path: &Path) -> Result<DashConfig> {
    let mut config = if path.exists() {
        let content =
            fs_err::read_to_string(path).map_err(|err| SyncError::ConfigMalformed {
                path: path.to_path_buf(),
                details: err.to_string(),
            })?;
        toml::from_str::<DashConfig>(&content).map_err(|err| SyncError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?
    } else {
        DashConfig::default()
    };

    if let Ok(url) = env::var(API_URL_ENV) {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            config.api.base_url = trimmed.to_string();
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config.api.request_timeout_secs, 15);
        assert_eq!(config.stream.retry_max_ms, 30_000);
        assert_eq!(config.page_limit(), 200);
        assert_eq!(config.viewport.top_threshold_px, 16.0);
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[api]
request_timeout_secs = 5

[table]
page_limit = 9000
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.api.request_timeout_secs, 5);
        assert_eq!(config.page_limit(), 500);
        assert_eq!(config.stream.path, "/stream");
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[api\nbase_url = 3").expect("write config");

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, SyncError::ConfigMalformed { .. }));
    }

    #[test]
    fn stream_url_joins_without_double_slashes() {
        let mut config = DashConfig::default();
        config.api.base_url = "http://example.test/api/incidents/".to_string();
        assert_eq!(
            config.stream_url(),
            "http://example.test/api/incidents/stream"
        );
    }
}
