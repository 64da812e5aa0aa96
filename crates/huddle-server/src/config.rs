//! Server configuration.
//!
//! All fields use `serde(default)` so a partial TOML file works; CLI
//! flags override the loaded values in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Seconds a fresh connection gets to complete the auth handshake.
    pub auth_timeout_secs: u64,
    /// Messages retained per room by the in-memory store.
    pub chat_history_limit: usize,
    /// Static token → identity mappings for the in-memory verifier.
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub token: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            auth_timeout_secs: 10,
            chat_history_limit: 500,
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}
