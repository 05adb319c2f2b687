//! Hub settings
//!
//! Loads settings from a TOML file such as:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 8080
//! path = "/ws"
//! queue_capacity = 1024
//! write_timeout_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;
/// Default WebSocket endpoint path
pub const DEFAULT_PATH: &str = "/ws";

/// Errors that can occur while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid endpoint path {0:?}: must start with '/'")]
    InvalidPath(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Where and how the WebSocket endpoint is served
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Request path accepted for upgrade
    pub path: String,
}

impl ServerConfig {
    /// Create a new server configuration serving the default path
    pub fn new(bind: impl Into<String>, port: u16) -> Self {
        Self {
            bind: bind.into(),
            port,
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Set the endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND, DEFAULT_PORT)
    }
}

/// Queue sizing and per-connection deadlines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubConfig {
    /// Outbound queue capacity; `None` keeps the queue unbounded
    pub queue_capacity: Option<usize>,
    /// Deadline for each inbound read
    pub read_timeout: Option<Duration>,
    /// Deadline for each outbound write during fan-out
    pub write_timeout: Option<Duration>,
}

impl HubConfig {
    /// Set the queue capacity; `None` or 0 keeps it unbounded
    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity.filter(|&c| c > 0);
        self
    }

    /// Set the per-read deadline
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the per-write deadline, also applied to closing a connection
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Settings as they appear in a config file or on the command line
///
/// Every field is optional so that sources can be layered with [`Settings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    /// 0 means unbounded
    pub queue_capacity: Option<usize>,
    /// 0 disables the deadline
    pub read_timeout_ms: Option<u64>,
    /// 0 disables the deadline
    pub write_timeout_ms: Option<u64>,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Layer `overrides` on top of these settings
    pub fn merge(self, overrides: Settings) -> Settings {
        Settings {
            bind: overrides.bind.or(self.bind),
            port: overrides.port.or(self.port),
            path: overrides.path.or(self.path),
            queue_capacity: overrides.queue_capacity.or(self.queue_capacity),
            read_timeout_ms: overrides.read_timeout_ms.or(self.read_timeout_ms),
            write_timeout_ms: overrides.write_timeout_ms.or(self.write_timeout_ms),
        }
    }

    /// Resolve the server configuration, filling in defaults
    pub fn server_config(&self) -> ConfigResult<ServerConfig> {
        let path = self.path.as_deref().unwrap_or(DEFAULT_PATH);
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath(path.to_string()));
        }

        let bind = self.bind.as_deref().unwrap_or(DEFAULT_BIND);
        Ok(ServerConfig::new(bind, self.port.unwrap_or(DEFAULT_PORT)).with_path(path))
    }

    /// Resolve the hub configuration
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::default()
            .with_queue_capacity(self.queue_capacity)
            .with_read_timeout(millis(self.read_timeout_ms))
            .with_write_timeout(millis(self.write_timeout_ms))
    }
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|&ms| ms > 0).map(Duration::from_millis)
}
