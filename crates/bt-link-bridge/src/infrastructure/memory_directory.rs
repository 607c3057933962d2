//! In-process [`DeviceDirectory`] with loopback accessories.
//!
//! Every accessory registered here answers on a loopback stream pair: bytes
//! written to the output come back on the input.  The loopback buffer is
//! bounded, so a client that writes faster than it reads sees real
//! backpressure (`has_space_available() == false`, queued sends, and a
//! `HasSpaceAvailable` event once the input is drained).  Like a platform
//! stream, the output posts `HasSpaceAvailable` after every write that
//! leaves room for more.
//!
//! Accessories can be attached and detached at runtime, which posts
//! `AccessoryConnected` / `AccessoryDisconnected` to every subscriber.
//! Detaching an accessory also fails its open stream pairs.
//!
//! Used by the binary when no platform directory is available, and by the
//! integration tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bt_link_core::{DeviceDescriptor, DeviceId};
use tracing::{debug, info};

use crate::domain::{
    AccessoryInput, AccessoryOutput, DeviceDirectory, DirectoryError, DirectoryEvent,
    EventSender, SessionEvent, StreamEvent, StreamPair, StreamSide, SubscriptionId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Directory ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    accessories: Vec<DeviceDescriptor>,
    subscribers: HashMap<SubscriptionId, EventSender>,
    next_subscription: SubscriptionId,
    links: Vec<(DeviceId, Weak<Mutex<Loopback>>)>,
}

impl Registry {
    fn broadcast(&mut self, event: DirectoryEvent) {
        self.subscribers
            .retain(|_, sink| sink.send(SessionEvent::Directory(event)).is_ok());
    }
}

/// Directory of loopback accessories.
pub struct MemoryDirectory {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl MemoryDirectory {
    /// Creates a directory listing `accessories`, each with a loopback buffer
    /// of `capacity` bytes.
    pub fn new(accessories: Vec<DeviceDescriptor>, capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                accessories,
                ..Registry::default()
            }),
            capacity: capacity.max(1),
        }
    }

    /// Adds (or replaces) an accessory and notifies subscribers.
    pub fn attach(&self, device: DeviceDescriptor) {
        let id = device.id;
        let mut registry = lock(&self.registry);
        registry.accessories.retain(|d| d.id != id);
        registry.accessories.push(device);
        info!("accessory {id} attached");
        registry.broadcast(DirectoryEvent::AccessoryConnected(id));
    }

    /// Removes an accessory, fails its open streams and notifies
    /// subscribers.  Returns `false` if it was not listed.
    pub fn detach(&self, id: DeviceId) -> bool {
        let mut registry = lock(&self.registry);
        let before = registry.accessories.len();
        registry.accessories.retain(|d| d.id != id);
        if registry.accessories.len() == before {
            return false;
        }

        registry.links.retain(|(device, link)| {
            if *device != id {
                return link.strong_count() > 0;
            }
            if let Some(link) = link.upgrade() {
                lock(&link).fail();
            }
            false
        });
        info!("accessory {id} detached");
        registry.broadcast(DirectoryEvent::AccessoryDisconnected(id));
        true
    }

    /// Makes `data` arrive from accessory `id` on every open stream pair, as
    /// if the accessory had sent it unprompted.  Returns the number of
    /// stream pairs that received it.
    ///
    /// Injected bytes are not bounded by the loopback capacity; the output
    /// reports no space until the input has been drained below it.
    pub fn inject(&self, id: DeviceId, data: &[u8]) -> usize {
        let mut registry = lock(&self.registry);
        registry.links.retain(|(_, link)| link.strong_count() > 0);
        registry
            .links
            .iter()
            .filter(|(device, _)| *device == id)
            .filter_map(|(_, link)| link.upgrade())
            .filter(|link| lock(link).inject(data))
            .count()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Number of stream pairs not yet closed.
    pub fn open_link_count(&self) -> usize {
        lock(&self.registry)
            .links
            .iter()
            .filter_map(|(_, link)| link.upgrade())
            .filter(|link| lock(link).is_open())
            .count()
    }
}

impl DeviceDirectory for MemoryDirectory {
    fn list_connected(&self) -> Vec<DeviceDescriptor> {
        lock(&self.registry).accessories.clone()
    }

    fn subscribe(&self, sink: EventSender) -> SubscriptionId {
        let mut registry = lock(&self.registry);
        registry.next_subscription += 1;
        let id = registry.next_subscription;
        registry.subscribers.insert(id, sink);
        debug!("subscription {id} added");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if lock(&self.registry).subscribers.remove(&id).is_some() {
            debug!("subscription {id} removed");
        }
    }

    fn open_streams(
        &self,
        device: DeviceId,
        protocol: &str,
        sink: EventSender,
    ) -> Result<StreamPair, DirectoryError> {
        let mut registry = lock(&self.registry);
        let descriptor = registry
            .accessories
            .iter()
            .find(|d| d.id == device)
            .ok_or(DirectoryError::NotConnected(device))?;
        if !descriptor.protocols.iter().any(|p| p == protocol) {
            return Err(DirectoryError::UnsupportedProtocol {
                device,
                protocol: protocol.to_string(),
            });
        }

        let link = Arc::new(Mutex::new(Loopback::new(self.capacity, sink)));
        registry.links.push((device, Arc::downgrade(&link)));
        {
            let loopback = lock(&link);
            loopback.post(StreamEvent::OpenCompleted(StreamSide::Input));
            loopback.post(StreamEvent::OpenCompleted(StreamSide::Output));
            loopback.post(StreamEvent::HasSpaceAvailable);
        }
        debug!("accessory {device}: loopback opened for {protocol}");

        Ok(StreamPair {
            input: Box::new(LoopbackInput(Arc::clone(&link))),
            output: Box::new(LoopbackOutput(link)),
        })
    }
}

impl std::fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("MemoryDirectory")
            .field("accessories", &registry.accessories.len())
            .field("subscribers", &registry.subscribers.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ── Loopback streams ──────────────────────────────────────────────────────────

struct Loopback {
    buffer: VecDeque<u8>,
    capacity: usize,
    input_open: bool,
    output_open: bool,
    failed: bool,
    sink: Option<EventSender>,
}

impl Loopback {
    fn new(capacity: usize, sink: EventSender) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            input_open: true,
            output_open: true,
            failed: false,
            sink: Some(sink),
        }
    }

    fn post(&self, event: StreamEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(SessionEvent::Stream(event));
        }
    }

    fn is_open(&self) -> bool {
        self.input_open || self.output_open
    }

    fn fail(&mut self) {
        if self.failed || !self.is_open() {
            return;
        }
        self.failed = true;
        self.post(StreamEvent::ErrorOccurred(StreamSide::Input));
    }

    fn inject(&mut self, data: &[u8]) -> bool {
        if self.failed || !self.input_open || data.is_empty() {
            return false;
        }
        self.buffer.extend(data);
        self.post(StreamEvent::HasBytesAvailable);
        true
    }

    fn release_sink_if_closed(&mut self) {
        if !self.is_open() {
            self.sink = None;
        }
    }
}

struct LoopbackInput(Arc<Mutex<Loopback>>);
struct LoopbackOutput(Arc<Mutex<Loopback>>);

impl AccessoryInput for LoopbackInput {
    fn has_bytes_available(&self) -> bool {
        let lb = lock(&self.0);
        lb.input_open && !lb.failed && !lb.buffer.is_empty()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut lb = lock(&self.0);
        if lb.failed {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "accessory detached"));
        }
        if !lb.input_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "input closed"));
        }
        let was_full = lb.buffer.len() >= lb.capacity;
        let n = buf.len().min(lb.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(lb.buffer.drain(..n)) {
            *slot = byte;
        }
        if was_full && lb.buffer.len() < lb.capacity && lb.output_open {
            lb.post(StreamEvent::HasSpaceAvailable);
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut lb = lock(&self.0);
        lb.input_open = false;
        lb.release_sink_if_closed();
    }
}

impl AccessoryOutput for LoopbackOutput {
    fn has_space_available(&self) -> bool {
        let lb = lock(&self.0);
        lb.output_open && !lb.failed && lb.buffer.len() < lb.capacity
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut lb = lock(&self.0);
        if lb.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "accessory detached"));
        }
        if !lb.output_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "output closed"));
        }
        let n = data.len().min(lb.capacity.saturating_sub(lb.buffer.len()));
        lb.buffer.extend(&data[..n]);
        if n > 0 {
            lb.post(StreamEvent::HasBytesAvailable);
        }
        if lb.buffer.len() < lb.capacity {
            lb.post(StreamEvent::HasSpaceAvailable);
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut lb = lock(&self.0);
        lb.output_open = false;
        lb.release_sink_if_closed();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
