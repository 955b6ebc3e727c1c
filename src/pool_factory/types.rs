// Copyright 2020 Joyent, Inc.

use std::fmt;

use serde::Deserialize;

use crate::endpoint::Endpoint;
use crate::error::Error;

// Milliseconds to wait for a free connection before failing an operation
pub const DEFAULT_FREE_CONNECTION_TIMEOUT: u64 = 10_000;
// Milliseconds between load conditioning checks
pub const DEFAULT_LOAD_CONDITIONING_INTERVAL: u64 = 300_000;
// Bytes
pub const DEFAULT_SOCKET_BUFFER_SIZE: u32 = 32_768;
// Milliseconds
pub const DEFAULT_READ_TIMEOUT: u64 = 10_000;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
// Milliseconds an idle connection above the minimum is kept open
pub const DEFAULT_IDLE_TIMEOUT: u64 = 5_000;
// Milliseconds between server pings
pub const DEFAULT_PING_INTERVAL: u64 = 10_000;
// Milliseconds between locator list refreshes
pub const DEFAULT_UPDATE_LOCATOR_LIST_INTERVAL: u64 = 5_000;
pub const DEFAULT_PR_SINGLE_HOP_ENABLED: bool = true;
pub const DEFAULT_THREAD_LOCAL_CONNECTIONS: bool = false;
pub const DEFAULT_MULTIUSER_AUTHENTICATION: bool = false;

/// A host and port pair as it appears in a configuration file. The port is
/// kept wide so that validation can report out of range values.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u32,
}

/// The connection attributes of a pool. They are handed to the engine when a
/// pool is created; the engine interprets them. Times are in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolAttributes {
    /// Time to wait for a free connection. Must be non-zero.
    pub free_connection_timeout: u64,
    /// Period at which connections are moved to rebalance server load.
    pub load_conditioning_interval: u64,
    /// Socket buffer size in bytes. Must be non-zero.
    pub socket_buffer_size: u32,
    /// Time to wait for a response from a server. Must be non-zero.
    pub read_timeout: u64,
    pub min_connections: u32,
    /// `None` means no upper bound.
    pub max_connections: Option<u32>,
    /// `None` means idle connections are never closed.
    pub idle_timeout: Option<u64>,
    /// `None` means every available server is tried once.
    pub retry_attempts: Option<u32>,
    /// Must be non-zero.
    pub ping_interval: u64,
    /// Zero disables locator list refreshes.
    pub update_locator_list_interval: u64,
    /// `None` disables statistic sampling.
    pub statistic_interval: Option<u64>,
    /// Restrict the pool to servers in this group. Empty means all servers.
    pub server_group: String,
    pub pr_single_hop_enabled: bool,
    pub thread_local_connections: bool,
    pub multiuser_authentication: bool,
    pub sni_proxy: Option<EndpointConfig>,
}

impl PoolAttributes {
    pub fn new() -> Self {
        PoolAttributes {
            free_connection_timeout: DEFAULT_FREE_CONNECTION_TIMEOUT,
            load_conditioning_interval: DEFAULT_LOAD_CONDITIONING_INTERVAL,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            retry_attempts: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            update_locator_list_interval: DEFAULT_UPDATE_LOCATOR_LIST_INTERVAL,
            statistic_interval: None,
            server_group: String::new(),
            pr_single_hop_enabled: DEFAULT_PR_SINGLE_HOP_ENABLED,
            thread_local_connections: DEFAULT_THREAD_LOCAL_CONNECTIONS,
            multiuser_authentication: DEFAULT_MULTIUSER_AUTHENTICATION,
            sni_proxy: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let non_zero = [
            ("free_connection_timeout", self.free_connection_timeout),
            ("read_timeout", self.read_timeout),
            ("ping_interval", self.ping_interval),
            ("socket_buffer_size", u64::from(self.socket_buffer_size)),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "{} must be greater than zero",
                field
            )));
        }

        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err(Error::InvalidConfiguration(String::from(
                    "max_connections must be greater than zero",
                )));
            }
            if self.min_connections > max {
                return Err(Error::InvalidConfiguration(format!(
                    "min_connections {} exceeds max_connections {}",
                    self.min_connections, max
                )));
            }
        }

        if let Some(proxy) = &self.sni_proxy {
            Endpoint::new(&proxy.host, proxy.port)?;
        }

        Ok(())
    }
}

impl Default for PoolAttributes {
    fn default() -> Self {
        Self::new()
    }
}

/// How a pool finds the servers of the cluster. A pool uses either locators
/// or a fixed list of servers, never both. Entries keep insertion order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Discovery {
    Unconfigured,
    Locators(Vec<Endpoint>),
    Servers(Vec<Endpoint>),
}

impl Discovery {
    pub fn is_configured(&self) -> bool {
        match self {
            Discovery::Unconfigured => false,
            Discovery::Locators(l) => !l.is_empty(),
            Discovery::Servers(s) => !s.is_empty(),
        }
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Discovery::Unconfigured
    }
}

impl fmt::Display for Discovery {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Discovery::Unconfigured => fmt.write_str("unconfigured"),
            Discovery::Locators(l) => write!(fmt, "{} locator(s)", l.len()),
            Discovery::Servers(s) => write!(fmt, "{} server(s)", s.len()),
        }
    }
}

/// A complete pool factory configuration, typically read from a JSON
/// document:
///
/// ```json
/// {
///     "locators": [{ "host": "host1", "port": 10334 }],
///     "attributes": { "read_timeout": 5000, "max_connections": 50 }
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub locators: Vec<EndpointConfig>,
    pub servers: Vec<EndpointConfig>,
    pub attributes: PoolAttributes,
}

impl PoolConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| {
            Error::InvalidConfiguration(format!("malformed pool config: {}", e))
        })
    }
}
