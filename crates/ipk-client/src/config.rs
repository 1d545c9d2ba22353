//! Client configuration
//!
//! Values come from an optional TOML file and the command line; command-line
//! values win.

use crate::{ClientError, Result};
use ipk_transport::{DatagramConfig, TransportKind, DEFAULT_PORT};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Resolved client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Transport protocol
    pub transport: TransportKind,

    /// Server hostname or IPv4 address
    pub server: String,

    /// Server port
    pub port: u16,

    /// Datagram confirmation timeout (milliseconds)
    pub udp_timeout: u64,

    /// Datagram retransmissions after the first attempt
    pub retransmissions: u8,

    /// How long to wait for a `REPLY` (milliseconds)
    pub reply_timeout: u64,
}

/// Configuration file contents, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub transport: Option<TransportKind>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub udp_timeout: Option<u64>,
    pub retransmissions: Option<u8>,
    pub reply_timeout: Option<u64>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub transport: Option<TransportKind>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub udp_timeout: Option<u64>,
    pub retransmissions: Option<u8>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_udp_timeout() -> u64 {
    250
}

fn default_retransmissions() -> u8 {
    3
}

fn default_reply_timeout() -> u64 {
    5000
}

impl ConfigFile {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {}", e)))
    }
}

impl ClientConfig {
    /// Merge file values with command-line overrides
    ///
    /// Transport and server have no default and must come from one of them.
    pub fn resolve(file: ConfigFile, cli: Overrides) -> Result<Self> {
        let transport = cli
            .transport
            .or(file.transport)
            .ok_or_else(|| ClientError::Config("transport protocol (-t) is required".to_string()))?;

        let server = cli
            .server
            .or(file.server)
            .ok_or_else(|| ClientError::Config("server address (-s) is required".to_string()))?;

        let config = Self {
            transport,
            server,
            port: cli.port.or(file.port).unwrap_or_else(default_port),
            udp_timeout: cli
                .udp_timeout
                .or(file.udp_timeout)
                .unwrap_or_else(default_udp_timeout),
            retransmissions: cli
                .retransmissions
                .or(file.retransmissions)
                .unwrap_or_else(default_retransmissions),
            reply_timeout: file.reply_timeout.unwrap_or_else(default_reply_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(ClientError::Config("server address is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must be non-zero".to_string()));
        }
        if self.udp_timeout == 0 {
            return Err(ClientError::Config("UDP timeout must be non-zero".to_string()));
        }
        if self.reply_timeout == 0 {
            return Err(ClientError::Config("reply timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Retransmission parameters for the datagram channel
    pub fn datagram_config(&self) -> DatagramConfig {
        DatagramConfig {
            timeout: Duration::from_millis(self.udp_timeout),
            retransmissions: self.retransmissions,
        }
    }

    /// Reply timeout as a duration
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout)
    }
}
