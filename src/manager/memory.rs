//! A backend that never touches the kernel. Every opened transport is a
//! channel whose traffic can be inspected, and kernel messages are queued
//! by hand. Input nodes appear when asked for, or right after CREATE2 when
//! the backend is built with [`MemoryBackend::auto_ready`].

use crate::error::{Error, Result};
use crate::manager::transport::{Backend, UhidTransport};
use crate::protocol::{KernelMessage, UhidRequest};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BackendState {
    channels: Vec<Arc<Channel>>,
    nodes: HashMap<String, Vec<PathBuf>>,
    next_node: usize,
    open_error: Option<io::ErrorKind>,
}
impl BackendState {
    fn surface(&mut self, uniq: &str) {
        let node = PathBuf::from(format!("/dev/input/event{}", self.next_node));
        self.next_node += 1;
        self.nodes.entry(uniq.to_string()).or_default().push(node);
    }
}

#[derive(Debug, Default)]
struct Channel {
    state: Mutex<ChannelState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct ChannelState {
    sent: Vec<(Instant, UhidRequest)>,
    pending: VecDeque<KernelMessage>,
    uniq: Option<String>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
    auto_ready: bool,
}
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give every device an input node as soon as it is created
    pub fn auto_ready() -> Self {
        Self {
            auto_ready: true,
            ..Self::default()
        }
    }

    /// Make every later `open` fail with this error kind
    pub fn fail_open(&self, kind: io::ErrorKind) {
        lock(&self.state).open_error = Some(kind);
    }

    /// Every transport opened so far, in order
    pub fn devices(&self) -> Vec<MemoryDevice> {
        lock(&self.state)
            .channels
            .iter()
            .cloned()
            .map(MemoryDevice)
            .collect()
    }

    /// Add one input node for the device created with `uniq`
    pub fn surface_node(&self, uniq: &str) {
        lock(&self.state).surface(uniq);
    }

    /// Add one input node to every device that sent CREATE2
    pub fn surface_all(&self) {
        let uniqs: Vec<String> = self.devices().iter().filter_map(MemoryDevice::uniq).collect();
        let mut state = lock(&self.state);
        for uniq in uniqs {
            state.surface(&uniq);
        }
    }

    pub fn remove_nodes(&self, uniq: &str) {
        lock(&self.state).nodes.remove(uniq);
    }
}
impl Backend for MemoryBackend {
    type Transport = MemoryTransport;

    fn open(&self) -> Result<MemoryTransport> {
        let mut state = lock(&self.state);
        if let Some(kind) = state.open_error {
            return Err(Error::open_failed("/dev/uhid", io::Error::from(kind)));
        }
        let channel = Arc::new(Channel::default());
        state.channels.push(Arc::clone(&channel));
        Ok(MemoryTransport {
            channel,
            backend: Arc::clone(&self.state),
            auto_ready: self.auto_ready,
        })
    }

    fn input_nodes(&self, uniq: &str) -> io::Result<Vec<PathBuf>> {
        Ok(lock(&self.state).nodes.get(uniq).cloned().unwrap_or_default())
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    channel: Arc<Channel>,
    backend: Arc<Mutex<BackendState>>,
    auto_ready: bool,
}
impl UhidTransport for MemoryTransport {
    fn send(&self, request: &UhidRequest) -> io::Result<()> {
        let mut state = lock(&self.channel.state);
        if state.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.sent.push((Instant::now(), request.clone()));
        if let UhidRequest::Create2 { uniq, .. } = request {
            state.uniq = Some(uniq.clone());
            if self.auto_ready {
                lock(&self.backend).surface(uniq);
            }
        }
        Ok(())
    }

    async fn receive(&self) -> io::Result<KernelMessage> {
        loop {
            let notified = self.channel.notify.notified();
            if let Some(message) = lock(&self.channel.state).pending.pop_front() {
                return Ok(message);
            }
            notified.await;
        }
    }
}
impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut state = lock(&self.channel.state);
        state.closed = true;
        if let Some(uniq) = &state.uniq {
            lock(&self.backend).nodes.remove(uniq);
        }
    }
}

/// Test-side view of one transport
#[derive(Debug, Clone)]
pub struct MemoryDevice(Arc<Channel>);
impl MemoryDevice {
    /// Queue a message as if the kernel had sent it
    pub fn push(&self, message: KernelMessage) {
        lock(&self.0.state).pending.push_back(message);
        self.0.notify.notify_one();
    }

    pub fn sent(&self) -> Vec<UhidRequest> {
        lock(&self.0.state)
            .sent
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn sent_at(&self) -> Vec<(Instant, UhidRequest)> {
        lock(&self.0.state).sent.clone()
    }

    /// Payloads of every INPUT2 written
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|request| match request {
                UhidRequest::Input2 { data } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn uniq(&self) -> Option<String> {
        lock(&self.0.state).uniq.clone()
    }

    /// True once the owning transport was dropped
    pub fn is_closed(&self) -> bool {
        lock(&self.0.state).closed
    }

    pub fn pending(&self) -> usize {
        lock(&self.0.state).pending.len()
    }
}
