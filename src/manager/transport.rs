use crate::error::{Error, Result};
use crate::manager::sysfs;
use crate::protocol::{KernelMessage, UHID_EVENT_SIZE, UhidRequest};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

/// One open handle to the uhid character device. Each handle owns exactly
/// one kernel HID device; closing it tears the device down.
#[allow(async_fn_in_trait)]
pub trait UhidTransport {
    fn send(&self, request: &UhidRequest) -> io::Result<()>;

    /// Wait for the next kernel message. Dropping the returned future
    /// before completion loses nothing.
    async fn receive(&self) -> io::Result<KernelMessage>;
}

/// Where virtual devices come from and how their input nodes are found
pub trait Backend {
    type Transport: UhidTransport;

    fn open(&self) -> Result<Self::Transport>;

    /// Event nodes the kernel created for the device with this `uniq`
    fn input_nodes(&self, uniq: &str) -> io::Result<Vec<PathBuf>>;
}

/// `/dev/uhid` opened non-blocking and registered with the reactor
#[derive(Debug)]
pub struct UhidFile {
    fd: AsyncFd<File>,
}
impl UhidFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| Error::open_failed(path, e))?;
        debug!("Opened {}", path.display());
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}
impl UhidTransport for UhidFile {
    fn send(&self, request: &UhidRequest) -> io::Result<()> {
        let buf = request.to_bytes()?;
        let mut file = self.fd.get_ref();
        let written = file.write(&buf)?;
        if written != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short uhid write: {} of {} bytes", written, buf.len()),
            ));
        }
        trace!("uhid <- type {}", request.event_type());
        Ok(())
    }

    async fn receive(&self) -> io::Result<KernelMessage> {
        let mut buf = vec![0u8; UHID_EVENT_SIZE];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(&mut buf)
            }) {
                Ok(result) => {
                    let len = result?;
                    let message = KernelMessage::from_bytes(&buf[..len])?;
                    trace!("uhid -> {:?}", message);
                    return Ok(message);
                }
                Err(_would_block) => continue,
            }
        }
    }
}

/// The real kernel interfaces
#[derive(Debug, Clone)]
pub struct LinuxBackend {
    pub uhid_path: PathBuf,
    pub sys_root: PathBuf,
    pub dev_root: PathBuf,
}
impl Default for LinuxBackend {
    fn default() -> Self {
        Self {
            uhid_path: PathBuf::from("/dev/uhid"),
            sys_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}
impl LinuxBackend {
    /// Defaults, overridable with `HIDMIMIC_UHID_PATH`, `HIDMIMIC_SYSFS_ROOT`
    /// and `HIDMIMIC_DEV_ROOT`
    pub fn from_env() -> Self {
        let mut backend = Self::default();
        if let Ok(path) = std::env::var("HIDMIMIC_UHID_PATH") {
            backend.uhid_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("HIDMIMIC_SYSFS_ROOT") {
            backend.sys_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("HIDMIMIC_DEV_ROOT") {
            backend.dev_root = PathBuf::from(path);
        }
        backend
    }
}
impl Backend for LinuxBackend {
    type Transport = UhidFile;

    fn open(&self) -> Result<UhidFile> {
        UhidFile::open(&self.uhid_path)
    }

    fn input_nodes(&self, uniq: &str) -> io::Result<Vec<PathBuf>> {
        sysfs::find_input_nodes(&self.sys_root, &self.dev_root, uniq)
    }
}
