use crate::error::{Error, Result};
use crate::manager::transport::{Backend, UhidTransport};
use crate::profiles::Behavior;
use crate::protocol::{KernelMessage, UHID_DATA_MAX, UhidRequest};
use crate::recording::DeviceDescriptor;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// CREATE2 sent, no input node seen yet
    Created,
    /// At least one input node exists and reports may be injected
    Ready,
    Destroyed,
}

/// An input node of a virtual device, held open while the device lives
#[derive(Debug)]
pub struct InputNode {
    pub path: PathBuf,
    handle: Option<File>,
}
impl InputNode {
    fn open(path: PathBuf) -> Self {
        let handle = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(&path);
        let handle = match handle {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("Could not open {}: {}", path.display(), e);
                None
            }
        };
        Self { path, handle }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

/// A kernel HID device created through uhid from a recorded descriptor
#[derive(Debug)]
pub struct VirtualDevice<T: UhidTransport> {
    index: u32,
    name: String,
    uniq: String,
    behavior: Behavior,
    transport: Option<T>,
    state: DeviceState,
    started: bool,
    opened: bool,
    input_nodes: Vec<InputNode>,
}

impl<T: UhidTransport> VirtualDevice<T> {
    /// Send CREATE2 for `descriptor` over a freshly opened transport
    pub fn create(transport: T, descriptor: &DeviceDescriptor, behavior: Behavior) -> Result<Self> {
        let uniq = format!("uhid_{}", ulid::Ulid::new());
        transport.send(&UhidRequest::Create2 {
            name: descriptor.name.clone(),
            phys: descriptor.physical_path.clone(),
            uniq: uniq.clone(),
            identity: descriptor.identity,
            report_descriptor: descriptor.report_descriptor.clone(),
        })?;
        info!(
            "Created device {} '{}' ({}) as {} [{:?}]",
            descriptor.index, descriptor.name, descriptor.identity, uniq, behavior
        );

        Ok(Self {
            index: descriptor.index,
            name: descriptor.name.clone(),
            uniq,
            behavior,
            transport: Some(transport),
            state: DeviceState::Created,
            started: false,
            opened: false,
            input_nodes: Vec::new(),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique string given to the kernel, used to find our sysfs entries
    pub fn uniq(&self) -> &str {
        &self.uniq
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == DeviceState::Ready
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether some client has the HID device open
    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn input_nodes(&self) -> &[InputNode] {
        &self.input_nodes
    }

    pub(crate) fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Re-read the input nodes from the backend and update readiness
    pub fn refresh_nodes<B>(&mut self, backend: &B) -> Result<bool>
    where
        B: Backend<Transport = T>,
    {
        if self.state == DeviceState::Destroyed {
            return Ok(false);
        }
        let paths = backend.input_nodes(&self.uniq)?;
        self.input_nodes.retain(|node| paths.contains(&node.path));
        for path in paths {
            if !self.input_nodes.iter().any(|node| node.path == path) {
                debug!("Device {} has input node {}", self.index, path.display());
                self.input_nodes.push(InputNode::open(path));
            }
        }

        let next = if self.input_nodes.is_empty() {
            DeviceState::Created
        } else {
            DeviceState::Ready
        };
        if next != self.state {
            debug!("Device {}: {:?} -> {:?}", self.index, self.state, next);
            self.state = next;
        }
        Ok(self.is_ready())
    }

    /// Wait up to `timeout` for one kernel message, handle it, then
    /// refresh the input nodes
    pub async fn poll_ready<B>(&mut self, backend: &B, timeout: Duration) -> Result<bool>
    where
        B: Backend<Transport = T>,
    {
        let received = match &self.transport {
            Some(transport) => tokio::time::timeout(timeout, transport.receive()).await.ok(),
            None => return Ok(false),
        };
        if let Some(message) = received {
            self.handle_message(message?)?;
        }
        self.refresh_nodes(backend)
    }

    pub fn handle_message(&mut self, message: KernelMessage) -> Result<()> {
        let Some(transport) = &self.transport else {
            trace!("Device {} destroyed, ignoring {:?}", self.index, message);
            return Ok(());
        };

        match message {
            KernelMessage::Start { dev_flags } => {
                debug!("Device {} started (flags 0x{:x})", self.index, dev_flags);
                self.started = true;
            }
            KernelMessage::Stop => {
                debug!("Device {} stopped", self.index);
                self.started = false;
                self.input_nodes.clear();
                if self.state == DeviceState::Ready {
                    self.state = DeviceState::Created;
                }
            }
            KernelMessage::Open => self.opened = true,
            KernelMessage::Close => self.opened = false,
            KernelMessage::Output { data, rtype } => self.behavior.output_report(&data, rtype),
            KernelMessage::GetReport { id, rnum, rtype } => {
                let reply = self.behavior.get_report(rnum, rtype);
                transport.send(&UhidRequest::GetReportReply {
                    id,
                    err: reply.err,
                    data: reply.data,
                })?;
            }
            KernelMessage::SetReport {
                id,
                rnum,
                rtype,
                data,
            } => {
                let err = self.behavior.set_report(rnum, rtype, &data);
                transport.send(&UhidRequest::SetReportReply { id, err })?;
            }
            KernelMessage::Unknown { event_type } => {
                trace!("Device {}: unhandled uhid event {}", self.index, event_type);
            }
        }
        Ok(())
    }

    /// Deliver one input report
    pub fn inject(&self, payload: &[u8]) -> Result<()> {
        let transport = match (&self.transport, self.state) {
            (Some(transport), DeviceState::Ready) => transport,
            _ => return Err(Error::DeviceNotReady { index: self.index }),
        };
        if payload.len() > UHID_DATA_MAX {
            return Err(Error::PayloadTooLarge { len: payload.len() });
        }
        let data = self.behavior.translate_input(payload).into_owned();
        transport.send(&UhidRequest::Input2 { data })?;
        Ok(())
    }

    /// Send DESTROY and release every handle. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Err(e) = transport.send(&UhidRequest::Destroy) {
            warn!("Failed to destroy device {}: {}", self.index, e);
        }
        drop(transport);
        self.input_nodes.clear();
        self.state = DeviceState::Destroyed;
        info!("Destroyed device {} '{}'", self.index, self.name);
    }
}

impl<T: UhidTransport> Drop for VirtualDevice<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Path list for log lines
pub(crate) fn display_nodes(nodes: &[InputNode]) -> String {
    nodes
        .iter()
        .map(|node| node.path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
