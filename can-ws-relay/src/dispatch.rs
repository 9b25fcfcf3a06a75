//! Broadcast dispatch to subscriber channels
//!
//! The relay knows two named channels. Both currently receive the identical
//! line for every frame; the delta channel has no differential encoding.

use crate::types::Result;
use std::fmt;
use std::str::FromStr;

/// A named fan-out target recognised by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every frame, as rendered
    RawRelay,
    /// Same payload as `RawRelay`
    Delta,
}

impl Channel {
    /// All channels, in dispatch order
    pub const ALL: [Channel; 2] = [Channel::RawRelay, Channel::Delta];

    /// WebSocket sub-protocol name of this channel
    pub fn protocol(&self) -> &'static str {
        match self {
            Channel::RawRelay => "can-raw-relay",
            Channel::Delta => "can-raw-delta",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.protocol() == s.trim())
            .ok_or_else(|| format!("unknown channel '{}'", s))
    }
}

/// Fire-and-forget fan-out of one text line
///
/// Implementations must not block on subscribers. An error means the
/// transport itself could not be invoked, never that nobody was listening.
pub trait Dispatcher {
    fn dispatch(&self, channel: Channel, text: &str) -> Result<()>;
}

impl<D: Dispatcher + ?Sized> Dispatcher for &D {
    fn dispatch(&self, channel: Channel, text: &str) -> Result<()> {
        (**self).dispatch(channel, text)
    }
}
