//! Virtual device lifecycle: creation through uhid, the kernel message
//! pump, the readiness barrier and teardown.

use crate::error::{Error, Result};
use crate::profiles::{Behavior, ProfileRegistry};
use crate::recording::{DeviceDescriptor, Session};
use crate::replay::EventSink;
use std::collections::BTreeMap;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

mod device;
mod memory;
mod sysfs;
mod transport;

pub use device::{DeviceState, InputNode, VirtualDevice};
pub use memory::{MemoryBackend, MemoryDevice, MemoryTransport};
pub use transport::{Backend, LinuxBackend, UhidFile, UhidTransport};

/// How long one readiness round waits for kernel messages
pub const READY_POLL: Duration = Duration::from_secs(1);

/// Owns every virtual device of a session, keyed by recording index
pub struct DeviceManager<B: Backend> {
    backend: B,
    devices: BTreeMap<u32, VirtualDevice<B::Transport>>,
    /// Where the next dispatch starts polling
    next_poll: usize,
}

impl<B: Backend> DeviceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            devices: BTreeMap::new(),
            next_poll: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device(&self, index: u32) -> Option<&VirtualDevice<B::Transport>> {
        self.devices.get(&index)
    }

    pub fn devices(&self) -> impl Iterator<Item = &VirtualDevice<B::Transport>> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Open a transport and create one kernel device. A device already
    /// managed under the same index is destroyed first.
    pub fn create(&mut self, descriptor: &DeviceDescriptor, behavior: Behavior) -> Result<()> {
        if let Some(mut old) = self.devices.remove(&descriptor.index) {
            old.destroy();
        }
        let transport = self.backend.open()?;
        let device = VirtualDevice::create(transport, descriptor, behavior)?;
        self.devices.insert(descriptor.index, device);
        Ok(())
    }

    /// Create every device of the session with the behavior the registry
    /// resolves for it
    pub fn create_session(&mut self, session: &Session, registry: &ProfileRegistry) -> Result<()> {
        for descriptor in session.devices.values() {
            let behavior = registry.resolve(&descriptor.identity);
            self.create(descriptor, behavior)?;
        }
        Ok(())
    }

    /// Handle the first kernel message that arrives on any device within
    /// `timeout`. Returns the number of messages handled. A zero timeout
    /// only looks at messages already waiting.
    ///
    /// Devices are polled round-robin across calls, so a busy device cannot
    /// starve the others. Cancel-safe: nothing is lost when the returned
    /// future is dropped.
    pub async fn dispatch(&mut self, timeout: Duration) -> Result<usize> {
        let start = self.next_poll;
        self.next_poll = self.next_poll.wrapping_add(1);
        let received = {
            let mut reads: Vec<_> = self
                .devices
                .iter()
                .filter_map(|(index, device)| {
                    device
                        .transport()
                        .map(|transport| (*index, Box::pin(transport.receive())))
                })
                .collect();
            if reads.is_empty() {
                tokio::time::sleep(timeout).await;
                return Ok(0);
            }

            let len = reads.len();
            let next = poll_fn(|cx| {
                for k in 0..len {
                    let (index, read) = &mut reads[(start % len + k) % len];
                    if let Poll::Ready(result) = Pin::as_mut(read).poll(cx) {
                        return Poll::Ready((*index, result));
                    }
                }
                Poll::Pending
            });
            tokio::time::timeout(timeout, next).await
        };

        let Ok((index, result)) = received else {
            return Ok(0);
        };
        let message = result?;
        match self.devices.get_mut(&index) {
            Some(device) => {
                trace!("Device {}: {:?}", index, message);
                device.handle_message(message)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Keep answering the kernel until an error occurs
    pub async fn pump_forever(&mut self) -> Result<()> {
        loop {
            self.dispatch(READY_POLL).await?;
        }
    }

    /// Re-read input nodes of every device. True once all of them are ready.
    pub fn refresh_readiness(&mut self) -> Result<bool> {
        let mut all_ready = true;
        for device in self.devices.values_mut() {
            all_ready &= device.refresh_nodes(&self.backend)?;
        }
        Ok(all_ready)
    }

    pub fn is_ready(&self) -> bool {
        self.devices.values().all(VirtualDevice::is_ready)
    }

    /// Block until every device has at least one input node, answering
    /// kernel messages meanwhile. There is no upper bound on the wait.
    pub async fn wait_until_ready(&mut self, poll: Duration) -> Result<()> {
        let started = Instant::now();
        while !self.refresh_readiness()? {
            let pending: Vec<u32> = self
                .devices
                .values()
                .filter(|device| !device.is_ready())
                .map(VirtualDevice::index)
                .collect();
            debug!("Waiting for input nodes of devices {:?}", pending);
            self.dispatch(poll).await?;
        }
        for device in self.devices.values() {
            info!(
                "Device {} '{}' ready: {}",
                device.index(),
                device.name(),
                device::display_nodes(device.input_nodes())
            );
        }
        debug!("Readiness reached after {:?}", started.elapsed());
        Ok(())
    }

    pub fn inject(&self, index: u32, payload: &[u8]) -> Result<()> {
        self.devices
            .get(&index)
            .ok_or(Error::UnknownDevice { index })?
            .inject(payload)
    }

    /// Destroy every device. Safe to call more than once.
    pub fn destroy_all(&mut self) {
        for device in self.devices.values_mut() {
            device.destroy();
        }
    }
}

impl<B: Backend> EventSink for DeviceManager<B> {
    fn inject(&mut self, device_index: u32, payload: &[u8]) -> Result<()> {
        DeviceManager::inject(self, device_index, payload)
    }
}

impl<B: Backend> Drop for DeviceManager<B> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Identity, KernelMessage, UHID_FEATURE_REPORT, UhidRequest};

    fn session(count: u32) -> Session {
        let mut session = Session::default();
        for index in 0..count {
            session.devices.insert(
                index,
                DeviceDescriptor {
                    index,
                    name: format!("Pad {}", index),
                    identity: Identity::new(3, 0x054c, 0x0268),
                    physical_path: String::new(),
                    report_descriptor: vec![0x05, 0x01, 0x09, 0x05],
                    declared_length: 4,
                },
            );
        }
        session
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_only_takes_pending_messages() {
        let backend = MemoryBackend::new();
        let mut manager = DeviceManager::new(backend.clone());
        manager
            .create_session(&session(2), &ProfileRegistry::builtin())
            .unwrap();

        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 0);

        backend.devices()[1].push(KernelMessage::GetReport {
            id: 3,
            rnum: 0xf5,
            rtype: UHID_FEATURE_REPORT,
        });
        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 1);
        assert!(matches!(
            backend.devices()[1].sent().last(),
            Some(UhidRequest::GetReportReply { id: 3, err: 0, .. })
        ));
        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_does_not_starve_the_others() {
        let backend = MemoryBackend::new();
        let mut manager = DeviceManager::new(backend.clone());
        manager
            .create_session(&session(2), &ProfileRegistry::builtin())
            .unwrap();

        let handles = backend.devices();
        for id in 0..2 {
            handles[0].push(KernelMessage::GetReport {
                id,
                rnum: 0xf2,
                rtype: UHID_FEATURE_REPORT,
            });
        }
        handles[1].push(KernelMessage::GetReport {
            id: 7,
            rnum: 0xf5,
            rtype: UHID_FEATURE_REPORT,
        });

        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 1);
        assert!(matches!(
            handles[1].sent().last(),
            Some(UhidRequest::GetReportReply { id: 7, err: 0, .. })
        ));

        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(manager.dispatch(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_times_out_without_messages() {
        let mut manager = DeviceManager::new(MemoryBackend::new());
        manager
            .create_session(&session(1), &ProfileRegistry::empty())
            .unwrap();
        let before = Instant::now();
        assert_eq!(manager.dispatch(Duration::from_millis(250)).await.unwrap(), 0);
        assert_eq!(before.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_waits_for_every_device() {
        let backend = MemoryBackend::new();
        let mut manager = DeviceManager::new(backend.clone());
        manager
            .create_session(&session(2), &ProfileRegistry::empty())
            .unwrap();

        let first = manager.device(0).unwrap().uniq().to_string();
        backend.surface_node(&first);
        assert!(!manager.refresh_readiness().unwrap());
        assert!(manager.inject(0, &[1]).is_ok());
        assert!(matches!(
            manager.inject(1, &[1]),
            Err(Error::DeviceNotReady { index: 1 })
        ));

        backend.surface_all();
        manager.wait_until_ready(READY_POLL).await.unwrap();
        assert!(manager.is_ready());
    }

    #[test]
    fn unknown_index_is_rejected() {
        let manager = DeviceManager::new(MemoryBackend::auto_ready());
        assert!(matches!(
            manager.inject(4, &[1]),
            Err(Error::UnknownDevice { index: 4 })
        ));
    }

    #[test]
    fn drop_destroys_every_device() {
        let backend = MemoryBackend::new();
        let mut manager = DeviceManager::new(backend.clone());
        manager
            .create_session(&session(3), &ProfileRegistry::empty())
            .unwrap();
        manager.destroy_all();
        drop(manager);
        for handle in backend.devices() {
            assert!(handle.is_closed());
            let destroys = handle
                .sent()
                .iter()
                .filter(|r| **r == UhidRequest::Destroy)
                .count();
            assert_eq!(destroys, 1);
        }
    }
}
