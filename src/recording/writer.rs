use super::{DeviceDescriptor, Session};
use std::io::{self, Write};
use std::time::Duration;

/// Writes devices and events in the recording format.
///
/// Every line is flushed as it is written so an interrupted recording
/// keeps everything captured so far.
pub struct RecordingWriter<W: Write> {
    out: W,
    current: Option<u32>,
}
impl<W: Write> RecordingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, current: None }
    }

    /// Write the `D:`, `N:`, `I:`, `P:` and `R:` lines of a device
    pub fn write_device(&mut self, device: &DeviceDescriptor) -> io::Result<()> {
        writeln!(self.out, "D: {}", device.index)?;
        writeln!(self.out, "N: {}", device.name)?;
        writeln!(
            self.out,
            "I: {:x} {:04x} {:04x}",
            device.identity.bus, device.identity.vendor_id, device.identity.product_id
        )?;
        writeln!(self.out, "P: {}", device.physical_path)?;
        writeln!(
            self.out,
            "R: {} {}",
            device.report_descriptor.len(),
            hex(&device.report_descriptor)
        )?;
        self.current = Some(device.index);
        self.out.flush()
    }

    /// Write one `E:` line, switching device first if needed
    pub fn write_event(&mut self, index: u32, elapsed: Duration, payload: &[u8]) -> io::Result<()> {
        if self.current != Some(index) {
            writeln!(self.out, "D: {}", index)?;
            self.current = Some(index);
        }
        writeln!(
            self.out,
            "E: {:06}.{:06} {} {}",
            elapsed.as_secs(),
            elapsed.subsec_micros(),
            payload.len(),
            hex(payload)
        )?;
        self.out.flush()
    }

    pub fn write_session(&mut self, session: &Session) -> io::Result<()> {
        for device in session.devices.values() {
            self.write_device(device)?;
        }
        for event in &session.events {
            self.write_event(
                event.device_index,
                Duration::from_micros((event.timestamp.max(0.0) * 1e6).round() as u64),
                &event.payload,
            )?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Identity;

    fn pad(index: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: "Example Pad".to_string(),
            identity: Identity::new(3, 0x054c, 0x0268),
            physical_path: String::new(),
            report_descriptor: vec![0x05, 0x01],
            declared_length: 2,
        }
    }

    #[test]
    fn device_header_lines() {
        let mut writer = RecordingWriter::new(Vec::new());
        writer.write_device(&pad(0)).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "D: 0\nN: Example Pad\nI: 3 054c 0268\nP: \nR: 2 05 01\n"
        );
    }

    #[test]
    fn event_line_uses_six_digit_fields() {
        let mut writer = RecordingWriter::new(Vec::new());
        writer.write_device(&pad(0)).unwrap();
        writer
            .write_event(0, Duration::from_micros(1_000_002), &[0xab, 0x01])
            .unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.ends_with("E: 000001.000002 2 ab 01\n"));
    }

    #[test]
    fn switching_devices_emits_d_line() {
        let mut writer = RecordingWriter::new(Vec::new());
        writer.write_device(&pad(0)).unwrap();
        writer.write_device(&pad(1)).unwrap();
        writer.write_event(0, Duration::ZERO, &[0x01]).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.ends_with("D: 0\nE: 000000.000000 1 01\n"));
    }
}
