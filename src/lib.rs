//! hidmimic - replay recorded HID sessions through Linux uhid
//!
//! This library recreates HID devices from a text recording as kernel
//! virtual devices, waits until the kernel exposes their input nodes and
//! then plays the recorded reports back with their original timing.

pub mod error;
pub mod filter;
pub mod hidraw;
pub mod manager;
pub mod profiles;
pub mod protocol;
pub mod recording;
pub mod replay;

// Re-export commonly used types
pub use error::{Error, Result};
pub use filter::IdentityFilter;
pub use hidraw::AttachedDevice;
pub use manager::{
    Backend, DeviceManager, DeviceState, LinuxBackend, MemoryBackend, UhidTransport, VirtualDevice,
};
pub use profiles::{Behavior, ProfileId, ProfileRegistry};
pub use protocol::{Identity, KernelMessage, UhidRequest};
pub use recording::{DeviceDescriptor, RecordedEvent, RecordingWriter, Session};
pub use replay::{EventSink, ReplayScheduler};
