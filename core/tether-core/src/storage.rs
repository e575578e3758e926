//! Storage configuration and path management for tether.
//!
//! Production code uses `StorageConfig::from_home()` which points to `~/.tether/`.
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

use crate::error::{Result, TetherError};

const ROOT_DIR: &str = ".tether";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(TetherError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR),
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to state.json (the durable key/value store).
    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Path to config.toml (client configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to logs/ directory (rolling client logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/tether-test"));
        assert_eq!(
            storage.state_file(),
            PathBuf::from("/tmp/tether-test/state.json")
        );
        assert_eq!(
            storage.config_file(),
            PathBuf::from("/tmp/tether-test/config.toml")
        );
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/tether-test/logs"));
    }
}
