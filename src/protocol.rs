//! The `uhid` character device protocol.
//!
//! Every message exchanged with `/dev/uhid` is one packed `struct uhid_event`
//! (see `linux/uhid.h`): a little-endian `u32` type followed by a union of
//! request bodies. Requests are always written as a full-size event; reads
//! may be shorter and only need to cover the body of their type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

pub const UHID_DESTROY: u32 = 1;
pub const UHID_START: u32 = 2;
pub const UHID_STOP: u32 = 3;
pub const UHID_OPEN: u32 = 4;
pub const UHID_CLOSE: u32 = 5;
pub const UHID_OUTPUT: u32 = 6;
pub const UHID_GET_REPORT: u32 = 9;
pub const UHID_GET_REPORT_REPLY: u32 = 10;
pub const UHID_CREATE2: u32 = 11;
pub const UHID_INPUT2: u32 = 12;
pub const UHID_SET_REPORT: u32 = 13;
pub const UHID_SET_REPORT_REPLY: u32 = 14;

pub const UHID_FEATURE_REPORT: u8 = 0;
pub const UHID_OUTPUT_REPORT: u8 = 1;
pub const UHID_INPUT_REPORT: u8 = 2;

pub const UHID_DATA_MAX: usize = 4096;
pub const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

pub const BUS_USB: u16 = 0x03;
pub const BUS_BLUETOOTH: u16 = 0x05;
pub const BUS_VIRTUAL: u16 = 0x06;

const NAME_LEN: usize = 128;
const PHYS_LEN: usize = 64;
const UNIQ_LEN: usize = 64;

// uhid_create2_req: name, phys, uniq, rd_size, bus, vendor, product,
// version, country, rd_data
const CREATE2_LEN: usize = NAME_LEN + PHYS_LEN + UNIQ_LEN + 2 + 2 + 4 * 4 + HID_MAX_DESCRIPTOR_SIZE;

/// Size of `struct uhid_event`; the create2 request is the largest member.
pub const UHID_EVENT_SIZE: usize = 4 + CREATE2_LEN;

/// Bus, vendor and product: what the kernel and the recordings use to
/// recognize a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub bus: u16,
    pub vendor_id: u16,
    pub product_id: u16,
}
impl Identity {
    pub const fn new(bus: u16, vendor_id: u16, product_id: u16) -> Self {
        Self {
            bus,
            vendor_id,
            product_id,
        }
    }
}
impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}:{:04x}",
            self.bus, self.vendor_id, self.product_id
        )
    }
}

/// Messages written to the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UhidRequest {
    Create2 {
        name: String,
        phys: String,
        uniq: String,
        identity: Identity,
        report_descriptor: Vec<u8>,
    },
    Destroy,
    Input2 {
        data: Vec<u8>,
    },
    GetReportReply {
        id: u32,
        err: u16,
        data: Vec<u8>,
    },
    SetReportReply {
        id: u32,
        err: u16,
    },
}
impl UhidRequest {
    pub fn event_type(&self) -> u32 {
        match self {
            UhidRequest::Create2 { .. } => UHID_CREATE2,
            UhidRequest::Destroy => UHID_DESTROY,
            UhidRequest::Input2 { .. } => UHID_INPUT2,
            UhidRequest::GetReportReply { .. } => UHID_GET_REPORT_REPLY,
            UhidRequest::SetReportReply { .. } => UHID_SET_REPORT_REPLY,
        }
    }

    /// Encode as a full `struct uhid_event`
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; UHID_EVENT_SIZE];
        put_u32(&mut buf, 0, self.event_type());

        match self {
            UhidRequest::Create2 {
                name,
                phys,
                uniq,
                identity,
                report_descriptor,
            } => {
                if report_descriptor.len() > HID_MAX_DESCRIPTOR_SIZE {
                    return Err(too_long("report descriptor", report_descriptor.len()));
                }
                put_cstr(&mut buf[4..4 + NAME_LEN], name);
                put_cstr(&mut buf[132..132 + PHYS_LEN], phys);
                put_cstr(&mut buf[196..196 + UNIQ_LEN], uniq);
                put_u16(&mut buf, 260, report_descriptor.len() as u16);
                put_u16(&mut buf, 262, identity.bus);
                put_u32(&mut buf, 264, identity.vendor_id as u32);
                put_u32(&mut buf, 268, identity.product_id as u32);
                // version and country stay zero
                buf[280..280 + report_descriptor.len()].copy_from_slice(report_descriptor);
            }
            UhidRequest::Destroy => {}
            UhidRequest::Input2 { data } => {
                if data.len() > UHID_DATA_MAX {
                    return Err(too_long("input report", data.len()));
                }
                put_u16(&mut buf, 4, data.len() as u16);
                buf[6..6 + data.len()].copy_from_slice(data);
            }
            UhidRequest::GetReportReply { id, err, data } => {
                if data.len() > UHID_DATA_MAX {
                    return Err(too_long("get_report reply", data.len()));
                }
                put_u32(&mut buf, 4, *id);
                put_u16(&mut buf, 8, *err);
                put_u16(&mut buf, 10, data.len() as u16);
                buf[12..12 + data.len()].copy_from_slice(data);
            }
            UhidRequest::SetReportReply { id, err } => {
                put_u32(&mut buf, 4, *id);
                put_u16(&mut buf, 8, *err);
            }
        }

        Ok(buf)
    }
}

/// Messages the kernel sends to a uhid device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelMessage {
    Start { dev_flags: u64 },
    Stop,
    Open,
    Close,
    Output { data: Vec<u8>, rtype: u8 },
    GetReport { id: u32, rnum: u8, rtype: u8 },
    SetReport { id: u32, rnum: u8, rtype: u8, data: Vec<u8> },
    Unknown { event_type: u32 },
}
impl KernelMessage {
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        let event_type = get_u32(buf, 0)?;
        let message = match event_type {
            UHID_START => KernelMessage::Start {
                dev_flags: get_u64(buf, 4)?,
            },
            UHID_STOP => KernelMessage::Stop,
            UHID_OPEN => KernelMessage::Open,
            UHID_CLOSE => KernelMessage::Close,
            UHID_OUTPUT => {
                // uhid_output_req: data[4096], size, rtype
                let size = get_u16(buf, 4 + UHID_DATA_MAX)? as usize;
                let rtype = get_u8(buf, 6 + UHID_DATA_MAX)?;
                KernelMessage::Output {
                    data: get_slice(buf, 4, size.min(UHID_DATA_MAX))?.to_vec(),
                    rtype,
                }
            }
            UHID_GET_REPORT => KernelMessage::GetReport {
                id: get_u32(buf, 4)?,
                rnum: get_u8(buf, 8)?,
                rtype: get_u8(buf, 9)?,
            },
            UHID_SET_REPORT => {
                let size = get_u16(buf, 10)? as usize;
                KernelMessage::SetReport {
                    id: get_u32(buf, 4)?,
                    rnum: get_u8(buf, 8)?,
                    rtype: get_u8(buf, 9)?,
                    data: get_slice(buf, 12, size.min(UHID_DATA_MAX))?.to_vec(),
                }
            }
            other => KernelMessage::Unknown { event_type: other },
        };
        Ok(message)
    }
}

fn too_long(what: &str, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} of {} bytes does not fit in a uhid event", what, len),
    )
}

fn put_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Copy a string into a fixed NUL-terminated field, truncating if needed
fn put_cstr(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
}

fn get_slice(buf: &[u8], off: usize, len: usize) -> io::Result<&[u8]> {
    buf.get(off..off + len).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("uhid event truncated at {} bytes", buf.len()),
        )
    })
}

fn get_u8(buf: &[u8], off: usize) -> io::Result<u8> {
    Ok(get_slice(buf, off, 1)?[0])
}

fn get_u16(buf: &[u8], off: usize) -> io::Result<u16> {
    let b = get_slice(buf, off, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn get_u32(buf: &[u8], off: usize) -> io::Result<u32> {
    let b = get_slice(buf, off, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn get_u64(buf: &[u8], off: usize) -> io::Result<u64> {
    let mut b = [0u8; 8];
    b.copy_from_slice(get_slice(buf, off, 8)?);
    Ok(u64::from_le_bytes(b))
}
