//! Server configuration.
//!
//! Settings come from three layers, highest precedence first:
//! command-line flags (or their `HUDDLE_*` environment variables), an
//! optional TOML file, and built-in defaults. Every key in the file is
//! optional:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:50051"
//! max_line_length = 65536
//!
//! [routing]
//! group_sigil = "@"
//! outbound_capacity = 256
//! delivery_timeout_ms = 5000
//!
//! [logging]
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use huddle_router::routing::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY};
use huddle_router::transport::DEFAULT_MAX_LINE_LENGTH;
use huddle_router::{ChatServerConfig, RouterConfig, DEFAULT_GROUP_SIGIL};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::telemetry::LogFormat;

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to listen on
    pub bind: SocketAddr,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 50051)),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Character marking a recipient as a group tag
    pub group_sigil: char,
    /// Per-client outbound queue capacity
    pub outbound_capacity: usize,
    /// Milliseconds a delivery waits for room in a full queue
    pub delivery_timeout_ms: u64,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            group_sigil: DEFAULT_GROUP_SIGIL,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Output format
    pub format: LogFormat,
}

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub routing: RoutingSection,
    pub logging: LoggingSection,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub max_line_length: Option<usize>,
    pub group_sigil: Option<char>,
    pub outbound_capacity: Option<usize>,
    pub delivery_timeout_ms: Option<u64>,
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// Load configuration from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply command-line values on top of this configuration.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(max_line_length) = overrides.max_line_length {
            self.server.max_line_length = max_line_length;
        }
        if let Some(group_sigil) = overrides.group_sigil {
            self.routing.group_sigil = group_sigil;
        }
        if let Some(outbound_capacity) = overrides.outbound_capacity {
            self.routing.outbound_capacity = outbound_capacity;
        }
        if let Some(timeout_ms) = overrides.delivery_timeout_ms {
            self.routing.delivery_timeout_ms = timeout_ms;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Build the chat server configuration, checking it is usable.
    pub fn server_config(&self) -> Result<ChatServerConfig> {
        let config = ChatServerConfig {
            bind_addr: self.server.bind,
            max_line_length: self.server.max_line_length,
            router: RouterConfig::default()
                .with_group_sigil(self.routing.group_sigil)
                .with_outbound_capacity(self.routing.outbound_capacity)
                .with_delivery_timeout(Duration::from_millis(self.routing.delivery_timeout_ms)),
        };
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
