//! Attached HID devices as seen through `/dev/hidraw*`.

use crate::error::{Error, Result};
use crate::protocol::{HID_MAX_DESCRIPTOR_SIZE, Identity};
use crate::recording::DeviceDescriptor;
use serde::Serialize;
use std::cell::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

// hidraw ioctls, from linux/hidraw.h
const IOC_READ: u64 = 2;

const fn ioc_read(nr: u64, size: u64) -> u64 {
    (IOC_READ << 30) | ((size & 0x3fff) << 16) | ((b'H' as u64) << 8) | nr
}

pub const HIDIOCGRDESCSIZE: u64 = ioc_read(0x01, 4);
pub const HIDIOCGRDESC: u64 = ioc_read(0x02, 4 + HID_MAX_DESCRIPTOR_SIZE as u64);
pub const HIDIOCGRAWINFO: u64 = ioc_read(0x03, 8);

pub const fn hidiocgrawname(len: usize) -> u64 {
    ioc_read(0x04, len as u64)
}

pub const fn hidiocgrawphys(len: usize) -> u64 {
    ioc_read(0x05, len as u64)
}

#[repr(C)]
struct hidraw_report_descriptor {
    size: u32,
    value: [u8; HID_MAX_DESCRIPTOR_SIZE],
}

#[repr(C)]
#[derive(Default)]
struct hidraw_devinfo {
    bustype: u32,
    vendor: i16,
    product: i16,
}

const STRING_LEN: usize = 256;

/// `/dev/hidraw*` nodes under `dev_root`, sorted by number
pub fn enumerate(dev_root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dev_root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(number) = name
            .to_str()
            .and_then(|n| n.strip_prefix("hidraw"))
            .and_then(|n| n.parse().ok())
        else {
            continue;
        };
        found.push((number, entry.path()));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Open every path, reporting and skipping the ones that fail
pub fn open_all(paths: &[PathBuf]) -> Vec<AttachedDevice> {
    paths
        .iter()
        .filter_map(|path| match AttachedDevice::open(path) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect()
}

/// A physical HID device opened through hidraw
#[derive(Debug)]
pub struct AttachedDevice {
    pub path: PathBuf,
    pub bus_type: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub physical_path: String,
    file: File,
    report_descriptor: OnceCell<Vec<u8>>,
}

impl AttachedDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let open_error = |source: io::Error| Error::DeviceOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(open_error)?;
        let fd = file.as_raw_fd();

        let mut info = hidraw_devinfo::default();
        ioctl(fd, HIDIOCGRAWINFO, &mut info).map_err(open_error)?;
        let name = ioctl_string(fd, hidiocgrawname(STRING_LEN)).map_err(open_error)?;
        let physical_path = ioctl_string(fd, hidiocgrawphys(STRING_LEN)).unwrap_or_default();
        debug!("Opened {} '{}'", path.display(), name);

        Ok(Self {
            path: path.to_path_buf(),
            bus_type: info.bustype as u16,
            vendor_id: info.vendor as u16,
            product_id: info.product as u16,
            name,
            physical_path,
            file,
            report_descriptor: OnceCell::new(),
        })
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.bus_type, self.vendor_id, self.product_id)
    }

    /// Raw report descriptor, fetched from the kernel on first use
    pub fn report_descriptor(&self) -> Result<&[u8]> {
        if let Some(rdesc) = self.report_descriptor.get() {
            return Ok(rdesc);
        }
        let rdesc = read_report_descriptor(self.file.as_raw_fd())?;
        Ok(self.report_descriptor.get_or_init(|| rdesc))
    }

    /// Everything needed to recreate this device through uhid
    pub fn descriptor(&self, index: u32) -> Result<DeviceDescriptor> {
        let report_descriptor = self.report_descriptor()?.to_vec();
        Ok(DeviceDescriptor {
            index,
            name: self.name.clone(),
            identity: self.identity(),
            physical_path: self.physical_path.clone(),
            declared_length: report_descriptor.len(),
            report_descriptor,
        })
    }

    /// One-line listing, `Device <path> Bus 003: ID 054c:0268 <name>`
    pub fn summary_line(&self) -> String {
        format!(
            "Device {} Bus {:03}: ID {:04x}:{:04x} {}",
            self.path.display(),
            self.bus_type,
            self.vendor_id,
            self.product_id,
            self.name
        )
    }

    pub fn summary(&self, with_descriptor: bool) -> Result<DeviceSummary> {
        let report_descriptor = if with_descriptor {
            Some(self.report_descriptor()?.to_vec())
        } else {
            None
        };
        Ok(DeviceSummary {
            path: self.path.clone(),
            bus: self.bus_type,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            name: self.name.clone(),
            physical_path: self.physical_path.clone(),
            report_descriptor,
        })
    }
}

/// Serializable listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub path: PathBuf,
    pub bus: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub physical_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_descriptor: Option<Vec<u8>>,
}

/// Hex dump, sixteen bytes per line, each line prefixed with `indent`
pub fn dump_bytes(bytes: &[u8], indent: &str) -> String {
    bytes
        .chunks(16)
        .map(|row| {
            let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
            format!("{}{}", indent, hex.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads input reports from an attached device without blocking the
/// runtime
pub struct ReportReader {
    fd: AsyncFd<File>,
}
impl ReportReader {
    pub fn new(device: &AttachedDevice) -> Result<Self> {
        let file = device.file.try_clone()?;
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }

    pub async fn read_report(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; HID_MAX_DESCRIPTOR_SIZE];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(&mut buf)
            }) {
                Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(result) => {
                    let len = result?;
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(_would_block) => continue,
            }
        }
    }
}

fn ioctl<T>(fd: RawFd, request: u64, arg: &mut T) -> io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

fn ioctl_string(fd: RawFd, request: u64) -> io::Result<String> {
    let mut buf = [0u8; STRING_LEN];
    let len = ioctl(fd, request, &mut buf)? as usize;
    let bytes = &buf[..len.min(STRING_LEN)];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn read_report_descriptor(fd: RawFd) -> io::Result<Vec<u8>> {
    let mut size: libc::c_int = 0;
    ioctl(fd, HIDIOCGRDESCSIZE, &mut size)?;

    let mut rdesc = hidraw_report_descriptor {
        size: size.clamp(0, HID_MAX_DESCRIPTOR_SIZE as libc::c_int) as u32,
        value: [0u8; HID_MAX_DESCRIPTOR_SIZE],
    };
    ioctl(fd, HIDIOCGRDESC, &mut rdesc)?;
    Ok(rdesc.value[..rdesc.size as usize].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_the_kernel() {
        assert_eq!(HIDIOCGRDESCSIZE, 0x80044801);
        assert_eq!(HIDIOCGRDESC, 0x90044802);
        assert_eq!(HIDIOCGRAWINFO, 0x80084803);
        assert_eq!(hidiocgrawname(256), 0x81004804);
        assert_eq!(hidiocgrawphys(256), 0x81004805);
    }

    #[test]
    fn enumerate_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["hidraw10", "hidraw2", "hidraw0", "hidrawx", "input", "uhid"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = enumerate(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("hidraw0"),
                dir.path().join("hidraw2"),
                dir.path().join("hidraw10"),
            ]
        );
    }

    #[test]
    fn failed_opens_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("hidraw0");
        assert!(open_all(&[missing.clone()]).is_empty());
        let err = AttachedDevice::open(&missing).unwrap_err();
        assert!(err.to_string().starts_with("can't open"));
    }

    #[test]
    fn regular_file_is_not_hidraw() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("hidraw0");
        std::fs::write(&fake, b"").unwrap();
        assert!(matches!(
            AttachedDevice::open(&fake),
            Err(Error::DeviceOpen { .. })
        ));
    }

    #[test]
    fn dump_wraps_at_sixteen_bytes() {
        let bytes: Vec<u8> = (0..18).collect();
        assert_eq!(
            dump_bytes(&bytes, "  "),
            "  00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n  10 11"
        );
    }
}
