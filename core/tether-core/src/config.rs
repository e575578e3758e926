//! Client configuration loading.
//!
//! Reads `~/.tether/config.toml` (or `$TETHER_CONFIG`). A missing file yields
//! defaults; every section and field is optional.
//!
//! ```toml
//! user_id = "alice"
//! active_tools = ["todo", "calendar"]
//!
//! [server]
//! channel_url = "ws://localhost:8000/ws/chat"
//! api_url = "http://localhost:8000/api/chat"
//!
//! [reconnect]
//! max_attempts = 5
//! delay_ms = 2000
//! ```

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};
use crate::storage::StorageConfig;

pub const CONFIG_ENV: &str = "TETHER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_id: String,
    pub active_tools: Vec<String>,
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub recovery: RecoveryConfig,
    pub tasks: TaskConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            active_tools: Vec::new(),
            server: ServerConfig::default(),
            reconnect: ReconnectConfig::default(),
            recovery: RecoveryConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub channel_url: String,
    pub api_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel_url: "ws://localhost:8000/ws/chat".to_string(),
            api_url: "http://localhost:8000/api/chat".to_string(),
            auth_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub settle_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 2_000,
            settle_ms: 100,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::milliseconds(self.delay_ms as i64)
    }

    pub fn settle(&self) -> Duration {
        Duration::milliseconds(self.settle_ms as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub stale_after_secs: u64,
    pub status_grace_ms: u64,
    pub watchdog_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            status_grace_ms: 1_000,
            watchdog_secs: 30,
        }
    }
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn status_grace(&self) -> Duration {
        Duration::milliseconds(self.status_grace_ms as i64)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::seconds(self.watchdog_secs as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub ttl_hours: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl TaskConfig {
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.ttl_hours as i64)
    }
}

/// Resolves the config path: `$TETHER_CONFIG`, else `~/.tether/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(StorageConfig::from_home()?.config_file())
}

pub fn load_client_config(path: Option<&Path>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(ClientConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| TetherError::StoreIo {
        context: format!("reading config {}", config_path.display()),
        source: err,
    })?;
    toml::from_str::<ClientConfig>(&content).map_err(|err| TetherError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_client_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_client_config(Some(&path)).expect("load config");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay(), Duration::seconds(2));
        assert_eq!(config.recovery.stale_after(), Duration::minutes(5));
        assert_eq!(config.tasks.ttl(), Duration::hours(24));
    }

    #[test]
    fn load_client_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
user_id = "alice"
active_tools = ["todo", "calendar"]

[server]
channel_url = "wss://agent.example.com/ws/chat"
auth_token = "secret"

[reconnect]
max_attempts = 3

[recovery]
watchdog_secs = 45
"#,
        )
        .expect("write config");

        let config = load_client_config(Some(&path)).expect("load config");
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.active_tools, vec!["todo", "calendar"]);
        assert_eq!(config.server.channel_url, "wss://agent.example.com/ws/chat");
        assert_eq!(config.server.api_url, ServerConfig::default().api_url);
        assert_eq!(config.server.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay_ms, 2_000);
        assert_eq!(config.recovery.watchdog(), Duration::seconds(45));
        assert_eq!(config.recovery.status_grace_ms, 1_000);
    }

    #[test]
    fn load_client_config_reports_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "user_id = [").expect("write config");

        let err = load_client_config(Some(&path)).unwrap_err();
        assert!(matches!(err, TetherError::ConfigMalformed { .. }));
    }
}
