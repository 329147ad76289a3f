//! Client configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FREECIV_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/freeciv-client/config.toml
//!   3. ~/.config/freeciv-client/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default FreeCiv server port.
pub const DEFAULT_SERVER_PORT: u16 = 6556;

/// Default join timeout in seconds.
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub join_timeout_secs: u64,
    pub validate_frames: bool,
    pub capture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            join_timeout_secs: DEFAULT_JOIN_TIMEOUT_SECS,
            validate_frames: false,
            capture_path: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("freeciv-client")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ClientConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FREECIV_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ClientConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FREECIV_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FREECIV_SERVER__HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("FREECIV_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("FREECIV_JOIN_TIMEOUT_SECS") {
            if let Ok(s) = v.parse() {
                self.join_timeout_secs = s;
            }
        }
        if let Ok(v) = std::env::var("FREECIV_VALIDATE_FRAMES") {
            self.validate_frames = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("FREECIV_CAPTURE_PATH") {
            self.capture_path = Some(PathBuf::from(v));
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_localhost() {
        let config = ClientConfig::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
        assert!(!config.validate_frames);
        assert!(config.capture_path.is_none());
    }

    #[test]
    fn join_timeout_reflects_configured_seconds() {
        let mut config = ClientConfig::default();
        config.join_timeout_secs = 30;
        assert_eq!(config.join_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("freeciv-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("FREECIV_CONFIG", config_path.to_str().unwrap());
        }

        let path = ClientConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = ClientConfig::load().expect("load should succeed");
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);

        unsafe {
            std::env::remove_var("FREECIV_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
