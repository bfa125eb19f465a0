//! Configuration for the reference binary.
//!
//! Everything here has a default mirroring the library defaults, so an
//! empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Reference binary configuration, loaded from TOML. Command-line flags
/// take precedence over file values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server listen address, like "0.0.0.0:8888".
    pub listen: Option<String>,

    /// Client target address, like "127.0.0.1:8888".
    pub target: Option<String>,

    /// Emit per-packet and heartbeat debug events.
    #[serde(default)]
    pub debug: bool,

    /// Maximum packet body length in bytes.
    #[serde(default = "default_max_body_length")]
    pub max_body_length: u32,

    /// Idle seconds before a PING is sent.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Idle read deadline in seconds, applied to server sessions and to
    /// the client connection.
    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,

    /// Per-write deadline in seconds.
    #[serde(default = "default_write_deadline_secs")]
    pub write_deadline_secs: u64,
}

fn default_max_body_length() -> u32 {
    crate::protocol::DEFAULT_MAX_BODY_LENGTH
}

fn default_heartbeat_secs() -> u64 {
    crate::network::DEFAULT_HEARTBEAT.as_secs()
}

fn default_read_deadline_secs() -> u64 {
    crate::network::DEFAULT_READ_DEADLINE.as_secs()
}

fn default_write_deadline_secs() -> u64 {
    crate::network::DEFAULT_WRITE_DEADLINE.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: None,
            target: None,
            debug: false,
            max_body_length: default_max_body_length(),
            heartbeat_secs: default_heartbeat_secs(),
            read_deadline_secs: default_read_deadline_secs(),
            write_deadline_secs: default_write_deadline_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }
}
