//! Frame → text rendering
//!
//! Produces the line format relayed to subscribers:
//!
//! ```text
//! (1000.000500) can0  123#DEAD
//! ```
//!
//! The frame encoding follows the can-utils compact ASCII grammar
//! (`<id>#<data>`), so existing log consumers can parse relayed lines.

use crate::types::{CanFrame, Timestamp, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_ERR_MASK, CAN_SFF_MASK};
use std::fmt::Write;

/// Render one relayed line
///
/// `name_width` is the longest interface name known at render time. The
/// name is left-aligned in a column one character wider than that, so the
/// column grows during a run as longer interface names appear.
pub fn render(timestamp: &Timestamp, device: &str, name_width: usize, frame: &CanFrame) -> String {
    let mut line = String::with_capacity(32 + name_width + 2 * frame.payload().len());
    let _ = write!(
        line,
        "({}.{:06}) {:<width$} ",
        timestamp.timestamp(),
        timestamp.timestamp_subsec_micros(),
        device,
        width = name_width + 1
    );
    push_frame(&mut line, frame);
    line
}

/// Encode a frame as `<id>#<data>`
///
/// - standard frames: 3 hex digits
/// - extended frames: 8 hex digits
/// - error frames: 8 hex digits including the error flag
/// - remote frames: `R` plus the DLC when it is non-zero
pub fn encode_frame(frame: &CanFrame) -> String {
    let mut out = String::with_capacity(9 + 2 * frame.payload().len());
    push_frame(&mut out, frame);
    out
}

fn push_frame(out: &mut String, frame: &CanFrame) {
    let _ = if frame.is_error_frame() {
        write!(out, "{:08X}#", frame.can_id & (CAN_ERR_MASK | CAN_ERR_FLAG))
    } else if frame.is_extended() {
        write!(out, "{:08X}#", frame.can_id & CAN_EFF_MASK)
    } else {
        write!(out, "{:03X}#", frame.can_id & CAN_SFF_MASK)
    };

    // error frames never carry RTR
    if frame.is_remote() && !frame.is_error_frame() {
        out.push('R');
        if frame.len > 0 {
            let _ = write!(out, "{:X}", frame.len.min(8));
        }
        return;
    }

    for byte in frame.payload() {
        let _ = write!(out, "{:02X}", byte);
    }
}
