//! Node configuration.
//!
//! A JSON config file in the platform config dir, with the API port
//! overridable through `LOOPTAP_API_PORT`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use looptap_protocol::DEFAULT_API_PORT;

/// Environment knob overriding the API listen port.
pub const API_PORT_ENV: &str = "LOOPTAP_API_PORT";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {API_PORT_ENV} value '{0}': must be 1..=65535")]
    BadPort(String),

    #[error("no config directory available")]
    NoConfigDir,
}

/// Node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// HTTP API listen port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Name label baked into the ADB public key; shown in the daemon's
    /// paired-devices list.
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_device_name() -> String {
    "looptap".into()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            device_name: default_device_name(),
        }
    }
}

impl NodeConfig {
    /// Loads the config file (if present) and applies environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match data_dir() {
            Some(dir) => {
                let path = dir.join("config.json");
                if path.exists() {
                    serde_json::from_str(&std::fs::read_to_string(&path)?)?
                } else {
                    Self::default()
                }
            }
            None => Self::default(),
        };

        if let Ok(raw) = std::env::var(API_PORT_ENV) {
            config.api_port = parse_port(&raw)?;
        }
        Ok(config)
    }
}

/// Parses a port knob, rejecting 0 and non-numeric input.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::BadPort(raw.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Returns the node's data directory (`<config dir>/looptap`).
pub fn data_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("looptap"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
