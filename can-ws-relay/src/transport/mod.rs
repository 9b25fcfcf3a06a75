//! Subscriber transport
//!
//! The relay core only needs a [`Dispatcher`](crate::Dispatcher). This module
//! provides the WebSocket server that implements it; the server runs its own
//! tokio runtime on a dedicated thread and is never re-entered by the core.

use crate::config::{RelayConfig, TlsConfig};

pub mod websocket;

pub use websocket::{WsBroadcaster, WsTransport};

/// Settings for creating a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Listening address
    pub bind_address: String,
    /// Listening port (0 picks a free port)
    pub port: u16,
    /// Certificate/key pair; `None` means plain WebSocket
    pub tls: Option<TlsConfig>,
}

impl TransportConfig {
    /// Plain WebSocket on `bind_address:port`
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            tls: None,
        }
    }
}

impl From<&RelayConfig> for TransportConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            tls: config.tls.clone(),
        }
    }
}
