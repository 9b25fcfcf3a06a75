//! Relay configuration types
//!
//! This module defines everything the relay library needs to open its bus
//! endpoints, size the interface index cache and start the transport.
//! Loading from files and command lines is handled by the application layer.

use crate::types::{RelayError, Result, IFNAMSIZ};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Interface name that binds a socket to every CAN interface
pub const ANY_INTERFACE: &str = "any";

/// Default listening port of the WebSocket server
pub const DEFAULT_PORT: u16 = 7681;

/// Default number of interface index cache slots
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Configuration for the relay library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bus endpoints to open, in configuration (scan) order
    #[serde(default)]
    pub interfaces: Vec<EndpointConfig>,

    /// Number of interface index cache slots
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Listening port of the WebSocket server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listening address of the WebSocket server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Optional TLS certificate/key pair
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            port: DEFAULT_PORT,
            bind_address: default_bind_address(),
            tls: None,
        }
    }
}

/// One raw CAN socket binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Interface name (e.g. "can0") or [`ANY_INTERFACE`]
    pub name: String,
    /// Optional identifier filter applied with `CAN_RAW_FILTER`
    #[serde(default)]
    pub filter: Option<IdFilter>,
    /// Optional error class mask applied with `CAN_RAW_ERR_FILTER`
    #[serde(default)]
    pub error_mask: Option<u32>,
}

impl EndpointConfig {
    /// Create an endpoint without filters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            error_mask: None,
        }
    }

    /// Builder method: set the identifier filter
    pub fn with_filter(mut self, filter: IdFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder method: set the error class mask
    pub fn with_error_mask(mut self, mask: u32) -> Self {
        self.error_mask = Some(mask);
        self
    }

    /// True if this endpoint listens on every CAN interface
    pub fn is_any(&self) -> bool {
        self.name == ANY_INTERFACE
    }
}

/// CAN identifier filter
///
/// A frame passes if `received_id & mask == value & mask`, or the opposite
/// when `inverse` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFilter {
    pub mask: u32,
    pub value: u32,
    #[serde(default)]
    pub inverse: bool,
}

impl IdFilter {
    /// Create a filter that accepts `value` under `mask`
    pub fn new(mask: u32, value: u32) -> Self {
        Self {
            mask,
            value,
            inverse: false,
        }
    }

    /// Builder method: invert the filter
    pub fn inverted(mut self) -> Self {
        self.inverse = true;
        self
    }

    /// A filter with neither mask nor value set is not installed
    pub fn is_active(&self) -> bool {
        self.mask != 0 || self.value != 0
    }
}

/// TLS certificate/key paths for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl RelayConfig {
    /// Create a new relay configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add an interface without filters
    pub fn add_interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(EndpointConfig::new(name));
        self
    }

    /// Builder method: add a fully specified endpoint
    pub fn add_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.interfaces.push(endpoint);
        self
    }

    /// Builder method: set the cache capacity
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Builder method: set the listening port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method: set the listening address
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Builder method: set the TLS certificate/key pair
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Longest configured interface name, used to seed the name column
    pub fn longest_interface_name(&self) -> usize {
        self.interfaces.iter().map(|e| e.name.len()).max().unwrap_or(0)
    }

    /// Check the configuration before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(RelayError::Config(
                "cache capacity must be at least 1".to_string(),
            ));
        }

        if self.interfaces.is_empty() {
            return Err(RelayError::Config(
                "at least one CAN interface is required".to_string(),
            ));
        }

        if self.interfaces.len() > self.cache_capacity {
            return Err(RelayError::TooManyInterfaces {
                requested: self.interfaces.len(),
                capacity: self.cache_capacity,
            });
        }

        for endpoint in &self.interfaces {
            if endpoint.name.is_empty() {
                return Err(RelayError::Config("empty CAN interface name".to_string()));
            }
            if endpoint.name.len() >= IFNAMSIZ {
                return Err(RelayError::InterfaceNameTooLong(endpoint.name.clone()));
            }
        }

        Ok(())
    }
}
