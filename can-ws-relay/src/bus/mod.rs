//! Bus endpoints (raw CAN sockets)
//!
//! This module defines the interface the multiplexer uses to read frames.
//! Each endpoint is a readable descriptor that yields exactly one frame per
//! receive call together with the kernel index of the interface it came from.

use crate::types::{CanFrame, Result, Timestamp};
use std::io;
use std::os::unix::io::AsRawFd;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::RawCanSocket;

/// One frame read from an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reception {
    /// The decoded frame
    pub frame: CanFrame,
    /// Kernel index of the interface that delivered the frame
    pub ifindex: u32,
}

/// Maps kernel interface indices to names
///
/// Used by the index cache both to claim a slot and to detect zombie
/// entries whose interface has disappeared.
pub trait InterfaceProbe {
    /// Resolve `ifindex` to the current interface name
    fn interface_name(&self, ifindex: u32) -> io::Result<String>;
}

/// Common trait for all frame sources polled by the multiplexer
pub trait BusEndpoint: InterfaceProbe + AsRawFd {
    /// Configured interface name, for log output
    fn label(&self) -> &str;

    /// Read exactly one frame
    ///
    /// Called only after the descriptor was reported readable. A read that
    /// returns fewer bytes than a full frame is an
    /// [`IncompleteFrame`](crate::RelayError::IncompleteFrame) error.
    fn receive(&mut self) -> Result<Reception>;

    /// Receive timestamp of the last frame read from this endpoint
    fn receive_timestamp(&self) -> io::Result<Timestamp>;
}
