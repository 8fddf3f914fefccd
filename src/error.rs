//! Error type shared by the recording parser, the virtual device lifecycle
//! and hidraw enumeration.

use std::io;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The recording does not follow the line grammar, or a declared
    /// length disagrees with the decoded bytes.
    #[error("malformed recording at line {line}: {reason}")]
    MalformedRecording { line: usize, reason: String },

    /// An event was injected before the kernel surfaced an input node.
    #[error("device {index} is not ready for input")]
    DeviceNotReady { index: u32 },

    #[error("no virtual device with index {index}")]
    UnknownDevice { index: u32 },

    /// Opening the kernel interface was refused.
    #[error("permission denied opening {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("can't open '{}': {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid device filter '{0}', expected [[bus]:]vendor:product")]
    InvalidFilter(String),

    #[error("report of {len} bytes exceeds the uhid maximum of 4096")]
    PayloadTooLarge { len: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecording {
            line,
            reason: reason.into(),
        }
    }

    /// Classify a failed `open()` of a device node.
    pub(crate) fn open_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::DeviceOpen { path, source },
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}
