use crate::{Error, Result, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_NOTIFICATION_TITLE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

/// Runtime settings for the synchronization core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Seconds between presence heartbeats
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Observers treat a user as offline once `lastSeen` is older than this
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_notification_title")]
    pub notification_title: String,

    #[serde(default = "default_push_endpoint")]
    pub push_endpoint: String,

    /// Maximum rows returned by a user search
    #[serde(default = "default_directory_limit")]
    pub directory_limit: usize,

    /// Path to the config file
    #[serde(skip)]
    pub path: PathBuf,
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs() * 3
}

fn default_notification_title() -> String {
    DEFAULT_NOTIFICATION_TITLE.to_string()
}

fn default_push_endpoint() -> String {
    DEFAULT_PUSH_ENDPOINT.to_string()
}

fn default_directory_limit() -> usize {
    50
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            notification_title: default_notification_title(),
            push_endpoint: default_push_endpoint(),
            directory_limit: default_directory_limit(),
            path: PathBuf::new(),
        }
    }
}

impl SyncConfig {
    /// Load config from a JSON file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(SyncConfig {
                path: path.to_path_buf(),
                ..Default::default()
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let mut config: SyncConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config(
                "heartbeatIntervalSecs must be positive".to_string(),
            ));
        }
        if self.stale_after_secs < self.heartbeat_interval_secs {
            return Err(Error::Config(
                "staleAfterSecs must not be shorter than heartbeatIntervalSecs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
