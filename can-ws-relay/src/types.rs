//! Core types for the CAN WebSocket relay
//!
//! This module defines the frame representation read from raw CAN sockets,
//! the receive timestamp type and the error type shared by every component.

use chrono::{DateTime, Utc};
use std::fmt;

/// Timestamp type used throughout the relay
pub type Timestamp = DateTime<Utc>;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Extended frame format flag (bit 31 of `can_id`)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag (bit 30 of `can_id`)
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error frame flag (bit 29 of `can_id`)
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;
/// Valid bits of a standard (11-bit) identifier
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Valid bits of an extended (29-bit) identifier
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Valid bits of an error class mask
pub const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;
/// Size of `struct can_frame` as delivered by a raw CAN socket
pub const CAN_MTU: usize = 16;

/// Interface name buffer size, including the terminating NUL
pub const IFNAMSIZ: usize = 16;

/// Classic CAN frame as delivered by a raw socket
///
/// The identifier keeps the kernel flag bits (EFF/RTR/ERR) so that the
/// textual encoder can tell the frame kinds apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// Raw `can_id` including EFF/RTR/ERR flag bits
    pub can_id: u32,
    /// Data length code (0-8)
    pub len: u8,
    /// Payload bytes; only the first `len` are meaningful
    pub data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Create a standard (11-bit) data frame
    pub fn standard(id: u16, payload: &[u8]) -> Self {
        Self::with_raw_id(u32::from(id) & CAN_SFF_MASK, payload)
    }

    /// Create an extended (29-bit) data frame
    pub fn extended(id: u32, payload: &[u8]) -> Self {
        Self::with_raw_id((id & CAN_EFF_MASK) | CAN_EFF_FLAG, payload)
    }

    /// Create a frame from a raw identifier (flag bits included)
    ///
    /// Payloads longer than 8 bytes are truncated.
    pub fn with_raw_id(can_id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(CAN_MAX_DLEN);
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            can_id,
            len: len as u8,
            data,
        }
    }

    /// Decode the 16-byte `struct can_frame` layout
    ///
    /// Layout: `can_id` (native endian u32), `len`, three reserved bytes,
    /// then eight data bytes. Anything shorter than [`CAN_MTU`] is an
    /// incomplete frame.
    pub fn from_wire(buf: &[u8]) -> Result<Self> {
        if buf.len() < CAN_MTU {
            return Err(RelayError::IncompleteFrame {
                received: buf.len(),
                expected: CAN_MTU,
            });
        }

        let can_id = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = buf[4].min(CAN_MAX_DLEN as u8);
        let mut data = [0u8; CAN_MAX_DLEN];
        data.copy_from_slice(&buf[8..CAN_MTU]);

        Ok(Self { can_id, len, data })
    }

    /// Encode into the 16-byte `struct can_frame` layout
    pub fn to_wire(&self) -> [u8; CAN_MTU] {
        let mut buf = [0u8; CAN_MTU];
        buf[..4].copy_from_slice(&self.can_id.to_ne_bytes());
        buf[4] = self.len;
        buf[8..].copy_from_slice(&self.data);
        buf
    }

    /// Identifier without flag bits
    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// True if this is an extended (29-bit) CAN ID
    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    /// True if this is a remote frame
    pub fn is_remote(&self) -> bool {
        self.can_id & CAN_RTR_FLAG != 0
    }

    /// True if this is an error frame
    pub fn is_error_frame(&self) -> bool {
        self.can_id & CAN_ERR_FLAG != 0
    }

    /// Get the meaningful payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(CAN_MAX_DLEN)]
    }
}

/// Convert a socket `timeval` pair into a [`Timestamp`]
///
/// Values chrono cannot represent fall back to the Unix epoch.
pub fn timestamp_from_timeval(secs: i64, micros: i64) -> Timestamp {
    let nanos = (micros.clamp(0, 999_999) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Errors that can occur while relaying frames
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("More than {capacity} CAN devices configured ({requested})")]
    TooManyInterfaces { requested: usize, capacity: usize },

    #[error("Name of CAN device '{0}' is too long")]
    InterfaceNameTooLong(String),

    #[error("Unknown CAN interface '{0}'")]
    UnknownInterface(String),

    #[error("Socket setup failed for '{interface}' ({operation}): {source}")]
    Socket {
        interface: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Interface index cache only supports {capacity} interfaces")]
    CacheExhausted { capacity: usize },

    #[error("Incomplete CAN frame: read {received} of {expected} bytes")]
    IncompleteFrame { received: usize, expected: usize },

    #[error("Receive failed on '{interface}': {source}")]
    Receive {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Readiness wait failed: {0}")]
    Readiness(#[source] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport is closed")]
    TransportClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of frame, used in log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Standard,
    Extended,
    Remote,
    Error,
}

impl From<&CanFrame> for FrameKind {
    fn from(frame: &CanFrame) -> Self {
        if frame.is_error_frame() {
            FrameKind::Error
        } else if frame.is_remote() {
            FrameKind::Remote
        } else if frame.is_extended() {
            FrameKind::Extended
        } else {
            FrameKind::Standard
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Standard => write!(f, "standard"),
            FrameKind::Extended => write!(f, "extended"),
            FrameKind::Remote => write!(f, "remote"),
            FrameKind::Error => write!(f, "error"),
        }
    }
}
