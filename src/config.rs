//! Sync configuration
//!
//! Stored as `sync_config.json` next to the local database.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, SyncError};

pub const CONFIG_FILE_NAME: &str = "sync_config.json";
pub const DB_FILE_NAME: &str = "haboard.db";
pub const DEFAULT_DEVICE_ID: &str = "rust_client";
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Task server root, e.g. `https://board.example.com`
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Push endpoint override; derived from `base_url` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_url: Option<String>,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Task list limit used by a full refresh
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            push_url: None,
            device_id: default_device_id(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Websocket URL: explicit `push_url`, or `base_url` with the scheme
    /// swapped to ws/wss and `/api/websocket` appended
    pub fn push_endpoint(&self) -> String {
        if let Some(url) = &self.push_url {
            return url.clone();
        }

        let base = self.base_url.trim_end_matches('/');
        let swapped = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/api/websocket", swapped)
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join(DB_FILE_NAME)
}

/// Read the saved configuration; `None` if missing or unreadable
pub fn get_sync_config(dir: &Path) -> Option<SyncConfig> {
    let path = config_path(dir);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), "ignoring invalid sync config: {}", e);
            None
        }
    }
}

pub fn save_sync_config(dir: &Path, config: &SyncConfig) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SyncError::Config(format!("Failed to create {}: {}", dir.display(), e)))?;
    let content = serde_json::to_string_pretty(config).map_err(|e| SyncError::Config(e.to_string()))?;
    std::fs::write(config_path(dir), content)
        .map_err(|e| SyncError::Config(format!("Failed to write sync config: {}", e)))
}
