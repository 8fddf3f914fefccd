//! Single-pass parser for the recording format.
//!
//! Each line is classified by its two-character prefix. `D:` switches the
//! current device; `N:`, `I:`, `P:`, `R:` describe it and `E:` appends an
//! event bound to it. Unknown prefixes, comments and blank lines are skipped
//! so newer recordings still load.
//!
//! Failures carry the 1-based line number. A failed parse never returns a
//! partially built [`Session`].

use super::{DeviceDescriptor, RecordedEvent, Session};
use crate::error::{Error, Result};
use crate::protocol::{HID_MAX_DESCRIPTOR_SIZE, Identity, UHID_DATA_MAX};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, trace};

impl Session {
    /// Parse a recording from a filesystem path
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|e| Error::open_failed(path, e))?;
        let session = Self::parse_reader(BufReader::new(file))?;
        debug!(
            "Loaded {} with {} device(s) and {} event(s)",
            path.display(),
            session.devices.len(),
            session.events.len()
        );
        Ok(session)
    }

    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut builder = SessionBuilder::default();
        for (line_num, line) in reader.lines().enumerate() {
            builder.feed(line_num + 1, &line?)?;
        }
        builder.finish()
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        Self::parse_reader(content.as_bytes())
    }
}

/// Fields collected for one device index while parsing
#[derive(Debug)]
struct PartialDevice {
    first_line: usize,
    name: Option<String>,
    identity: Option<Identity>,
    physical_path: String,
    report_descriptor: Option<(usize, Vec<u8>)>,
}
impl PartialDevice {
    fn new(first_line: usize) -> Self {
        Self {
            first_line,
            name: None,
            identity: None,
            physical_path: String::new(),
            report_descriptor: None,
        }
    }

    fn build(self, index: u32) -> Result<DeviceDescriptor> {
        let missing = |field: &str| {
            Error::malformed(
                self.first_line,
                format!("device {} has no {} line", index, field),
            )
        };
        let name = self.name.clone().ok_or_else(|| missing("N:"))?;
        let identity = self.identity.ok_or_else(|| missing("I:"))?;
        let (declared_length, report_descriptor) =
            self.report_descriptor.clone().ok_or_else(|| missing("R:"))?;

        Ok(DeviceDescriptor {
            index,
            name,
            identity,
            physical_path: self.physical_path,
            report_descriptor,
            declared_length,
        })
    }
}

#[derive(Debug, Default)]
struct SessionBuilder {
    current: u32,
    devices: BTreeMap<u32, PartialDevice>,
    events: Vec<RecordedEvent>,
}
impl SessionBuilder {
    fn feed(&mut self, line_num: usize, line: &str) -> Result<()> {
        let line = line.trim();
        let Some((prefix, rest)) = split_prefix(line) else {
            return Ok(());
        };
        let rest = rest.trim();
        let bad = |reason: String| Error::malformed(line_num, reason);

        match prefix {
            "D:" => {
                self.current = rest
                    .parse()
                    .map_err(|_| bad(format!("invalid device index '{}'", rest)))?;
                trace!("line {}: switching to device {}", line_num, self.current);
                return Ok(());
            }
            "N:" | "I:" | "P:" | "R:" | "E:" => {}
            _ => {
                trace!("line {}: ignoring unknown prefix {}", line_num, prefix);
                return Ok(());
            }
        }

        let index = self.current;
        let device = self
            .devices
            .entry(index)
            .or_insert_with(|| PartialDevice::new(line_num));

        match prefix {
            "N:" => {
                if rest.is_empty() {
                    return Err(bad("empty device name".to_string()));
                }
                device.name = Some(rest.to_string());
            }
            "I:" => {
                let ids = rest
                    .split_whitespace()
                    .map(|field| u16::from_str_radix(field, 16))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| bad(format!("invalid identity '{}': {}", rest, e)))?;
                let [bus, vendor_id, product_id] = ids[..] else {
                    return Err(bad(format!(
                        "expected bus, vendor and product, got '{}'",
                        rest
                    )));
                };
                device.identity = Some(Identity::new(bus, vendor_id, product_id));
            }
            "P:" => device.physical_path = rest.to_string(),
            "R:" => {
                let mut fields = rest.split_whitespace();
                let declared = parse_count(fields.next(), "descriptor length").map_err(bad)?;
                let bytes = decode_hex(fields).map_err(bad)?;
                if bytes.len() != declared {
                    return Err(bad(format!(
                        "report descriptor declares {} bytes but contains {}",
                        declared,
                        bytes.len()
                    )));
                }
                if declared > HID_MAX_DESCRIPTOR_SIZE {
                    return Err(bad(format!(
                        "report descriptor of {} bytes exceeds {}",
                        declared, HID_MAX_DESCRIPTOR_SIZE
                    )));
                }
                device.report_descriptor = Some((declared, bytes));
            }
            "E:" => {
                let mut fields = rest.split_whitespace();
                let timestamp = parse_timestamp(fields.next()).map_err(bad)?;
                let declared = parse_count(fields.next(), "event length").map_err(bad)?;
                let payload = decode_hex(fields).map_err(bad)?;
                if payload.len() != declared {
                    return Err(bad(format!(
                        "event declares {} bytes but contains {}",
                        declared,
                        payload.len()
                    )));
                }
                if declared > UHID_DATA_MAX {
                    return Err(bad(format!(
                        "event of {} bytes exceeds {}",
                        declared, UHID_DATA_MAX
                    )));
                }
                self.events.push(RecordedEvent {
                    device_index: index,
                    timestamp,
                    declared_count: declared,
                    payload,
                });
            }
            _ => unreachable!(),
        }

        Ok(())
    }

    fn finish(self) -> Result<Session> {
        let devices = self
            .devices
            .into_iter()
            .map(|(index, partial)| Ok((index, partial.build(index)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Session {
            devices,
            events: self.events,
        })
    }
}

/// Split `"X: rest"` into `("X:", " rest")`
fn split_prefix(line: &str) -> Option<(&str, &str)> {
    if line.len() < 2 || !line.is_char_boundary(2) {
        return None;
    }
    let (prefix, rest) = line.split_at(2);
    prefix.ends_with(':').then_some((prefix, rest))
}

fn parse_count(field: Option<&str>, what: &str) -> Result<usize, String> {
    let field = field.ok_or_else(|| format!("missing {}", what))?;
    field
        .parse()
        .map_err(|_| format!("invalid {} '{}'", what, field))
}

/// `sec.usec`, both decimal integers
fn parse_timestamp(field: Option<&str>) -> Result<f64, String> {
    let field = field.ok_or_else(|| "missing timestamp".to_string())?;
    let invalid = || format!("invalid timestamp '{}'", field);
    let (sec, usec) = field.split_once('.').unwrap_or((field, "0"));
    let sec: u64 = sec.parse().map_err(|_| invalid())?;
    let usec: u64 = usec.parse().map_err(|_| invalid())?;
    Ok(sec as f64 + usec as f64 / 1_000_000.0)
}

/// Decode whitespace separated hex tokens. A single digit is one byte,
/// longer tokens must hold whole byte pairs (`0102` is two bytes).
fn decode_hex<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for token in tokens {
        if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("invalid hex byte '{}'", token));
        }
        let digits = token.as_bytes();
        match digits.len() {
            1 => bytes.push(nibble(digits[0])),
            n if n % 2 == 0 => {
                for pair in digits.chunks_exact(2) {
                    bytes.push(nibble(pair[0]) << 4 | nibble(pair[1]));
                }
            }
            _ => return Err(format!("odd number of hex digits in '{}'", token)),
        }
    }
    Ok(bytes)
}

fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
