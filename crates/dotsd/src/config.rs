// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker daemon configuration.

use dots::io::HostConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Broker daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 11234)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Broker name sent to guests in the handshake
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Forward updates back to the guest that published them
    #[serde(default)]
    pub echo_to_origin: bool,

    /// Maximum frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Period of the client directory cleanup (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub housekeeping_interval_ms: u64,

    /// Period of the daemon status publication (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub status_interval_ms: u64,

    /// Shared secret guests must prove; `None` accepts every guest
    #[serde(default)]
    pub auth_secret: Option<String>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    11234
}

fn default_server_name() -> String {
    "dotsd".to_owned()
}

fn default_max_message_size() -> usize {
    dots::protocol::DEFAULT_MAX_FRAME_SIZE
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            server_name: default_server_name(),
            echo_to_origin: false,
            max_message_size: default_max_message_size(),
            housekeeping_interval_ms: default_interval_ms(),
            status_interval_ms: default_interval_ms(),
            auth_secret: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Settings handed to the broker transceiver.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            server_name: self.server_name.clone(),
            echo_to_origin: self.echo_to_origin,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.server_name.is_empty() {
            return Err(ConfigError::InvalidValue("server_name cannot be empty".into()));
        }
        if self.max_message_size < 64 {
            return Err(ConfigError::InvalidValue(format!(
                "max_message_size too small: {}",
                self.max_message_size
            )));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue(format!(
                "max_message_size exceeds the 32-bit frame prefix: {}",
                self.max_message_size
            )));
        }
        if self.housekeeping_interval_ms == 0 || self.status_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("intervals cannot be 0".into()));
        }
        if self.auth_secret.as_deref() == Some("") {
            return Err(ConfigError::InvalidValue("auth_secret cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
