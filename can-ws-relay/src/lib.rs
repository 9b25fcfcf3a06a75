//! CAN WebSocket Relay Library
//!
//! Reads live frames from raw CAN sockets and republishes them as text lines
//! to WebSocket subscribers.
//!
//! # Architecture
//!
//! The ingestion core is single-threaded and readiness based:
//! - [`Multiplexer`] waits on every bus socket at once with `poll(2)`
//! - [`IndexCache`] maps the kernel interface index of each frame to a name
//! - [`formatter`] renders `(<sec>.<usec>) <iface> <id>#<data>` lines
//! - a [`Dispatcher`] fans each line out to the [`Channel`]s
//!
//! The WebSocket server ([`WsTransport`]) and the signal watcher each run on
//! their own thread and only meet the core through [`Dispatcher`] and
//! [`ShutdownSignal`].
//!
//! # Example Usage
//!
//! ```no_run
//! use can_ws_relay::{
//!     IndexCache, Multiplexer, RawCanSocket, RelayConfig, ShutdownSignal,
//!     TransportConfig, WsTransport,
//! };
//!
//! let config = RelayConfig::new().add_interface("can0").add_interface("can1");
//! config.validate().unwrap();
//!
//! let mut transport = WsTransport::create(TransportConfig::from(&config)).unwrap();
//! transport.start().unwrap();
//!
//! let endpoints = config
//!     .interfaces
//!     .iter()
//!     .map(RawCanSocket::open)
//!     .collect::<Result<Vec<_>, _>>()
//!     .unwrap();
//!
//! let mut cache = IndexCache::new(config.cache_capacity);
//! cache.note_name_len(config.longest_interface_name());
//!
//! let shutdown = ShutdownSignal::new().unwrap();
//! let mut mux = Multiplexer::new(endpoints, cache, transport.dispatcher(), shutdown);
//! let result = mux.run();
//!
//! mux.close();
//! transport.destroy();
//! result.unwrap();
//! ```

// Public modules
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod formatter;
pub mod lifecycle;
pub mod multiplexer;
pub mod resolver;
pub mod transport;
pub mod types;

// Re-export main types for convenience
#[cfg(target_os = "linux")]
pub use bus::RawCanSocket;
pub use bus::{BusEndpoint, InterfaceProbe, Reception};
pub use config::{EndpointConfig, IdFilter, RelayConfig, TlsConfig, ANY_INTERFACE, DEFAULT_PORT};
pub use dispatch::{Channel, Dispatcher};
pub use lifecycle::{ShutdownSignal, SignalWatcher};
pub use multiplexer::{Multiplexer, RunStats};
pub use resolver::IndexCache;
pub use transport::{TransportConfig, WsBroadcaster, WsTransport};
pub use types::{CanFrame, RelayError, Result, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
