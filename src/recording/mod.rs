//! Recorded HID sessions.
//!
//! A recording is a line-oriented text file describing one or more devices
//! followed by the input reports they produced:
//!
//! ```text
//! D: 0
//! N: Example Pad
//! I: 3 54c 268
//! P: usb-0000:00:14.0-1/input0
//! R: 4 05 01 09 05
//! E: 0.000000 2 01 02
//! E: 0.016000 2 01 03
//! ```
//!
//! See [`parser`] for the grammar and [`writer`] for producing it.

use crate::protocol::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod parser;
pub mod writer;

pub use writer::RecordingWriter;

/// One recorded device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: u32,
    pub name: String,
    pub identity: Identity,
    pub physical_path: String,
    pub report_descriptor: Vec<u8>,
    /// Length announced by the `R:` line
    pub declared_length: usize,
}

/// One input report as captured from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub device_index: u32,
    /// Seconds since the start of the recording
    pub timestamp: f64,
    /// Byte count announced by the `E:` line
    pub declared_count: usize,
    pub payload: Vec<u8>,
}

/// A parsed recording: devices by index plus every event in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub devices: BTreeMap<u32, DeviceDescriptor>,
    pub events: Vec<RecordedEvent>,
}
impl Session {
    pub fn device(&self, index: u32) -> Option<&DeviceDescriptor> {
        self.devices.get(&index)
    }

    /// Events belonging to one device, in file order
    pub fn events_for(&self, index: u32) -> impl Iterator<Item = &RecordedEvent> {
        self.events.iter().filter(move |e| e.device_index == index)
    }

    /// Timestamp of the last event, or zero for an empty stream
    pub fn duration(&self) -> f64 {
        self.events.last().map(|e| e.timestamp).unwrap_or(0.0)
    }
}
