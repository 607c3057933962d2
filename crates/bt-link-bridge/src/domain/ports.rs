//! Ports between a session and the outside world.
//!
//! A session never talks to the OS directly.  It sees two collaborators:
//!
//! - a [`DeviceDirectory`]: lists connected accessories, notifies about new
//!   ones, and opens a stream pair for an accessory + protocol;
//! - the [`AccessoryInput`] / [`AccessoryOutput`] halves of that stream pair:
//!   non-blocking byte streams that report readiness through events.
//!
//! # Event delivery
//!
//! Both collaborators report asynchronous happenings by posting a
//! [`SessionEvent`] onto the session's own channel ([`EventSender`]).  The
//! session drains that channel on its task, so event sources never hold a
//! reference to the session and a dropped session simply stops reading.
//!
//! ```text
//! DeviceDirectory ──AccessoryConnected──┐
//!                                        ├──► EventSender ──► session task
//! Input/Output streams ──readiness──────┘
//! ```

use std::io;

use bt_link_core::{DeviceDescriptor, DeviceId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Handle returned by [`DeviceDirectory::subscribe`].
pub type SubscriptionId = u64;

/// Sending half of a session's event channel.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Which half of a stream pair an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    /// Accessory → bridge.
    Input,
    /// Bridge → accessory.
    Output,
}

/// Readiness and termination events of a bound stream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// A stream finished opening.
    OpenCompleted(StreamSide),
    /// The input stream has bytes that can be read without blocking.
    HasBytesAvailable,
    /// The output stream can accept a write without blocking.
    HasSpaceAvailable,
    /// A stream reached its end.  The other direction may still work.
    EndEncountered(StreamSide),
    /// A stream failed.  The pair is unusable.
    ErrorOccurred(StreamSide),
}

/// Notifications from the device directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// An accessory became visible.
    AccessoryConnected(DeviceId),
    /// An accessory went away.
    AccessoryDisconnected(DeviceId),
}

/// Everything that can arrive on a session's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// From the device directory subscription.
    Directory(DirectoryEvent),
    /// From the bound stream pair.
    Stream(StreamEvent),
}

// ── Streams ───────────────────────────────────────────────────────────────────

/// Non-blocking input half of an accessory connection.
pub trait AccessoryInput: Send {
    /// `true` if [`read`](Self::read) would return data without blocking.
    fn has_bytes_available(&self) -> bool;

    /// Reads up to `buf.len()` bytes.  `Ok(0)` means nothing further is
    /// available right now.
    ///
    /// # Errors
    ///
    /// Returns the stream's I/O error.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Closes the stream and stops posting events.  Idempotent.
    fn close(&mut self);
}

/// Non-blocking output half of an accessory connection.
pub trait AccessoryOutput: Send {
    /// `true` if [`write`](Self::write) would accept bytes without blocking.
    fn has_space_available(&self) -> bool;

    /// Writes as many bytes of `data` as fit; returns the count written.
    ///
    /// # Errors
    ///
    /// Returns the stream's I/O error.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Closes the stream and stops posting events.  Idempotent.
    fn close(&mut self);
}

/// The bound input/output streams for one accessory + protocol.
pub struct StreamPair {
    /// Accessory → bridge.
    pub input: Box<dyn AccessoryInput>,
    /// Bridge → accessory.
    pub output: Box<dyn AccessoryOutput>,
}

impl std::fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPair").finish_non_exhaustive()
    }
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Errors from [`DeviceDirectory::open_streams`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No accessory with this id is connected.
    #[error("accessory {0} is not connected")]
    NotConnected(DeviceId),

    /// The accessory does not speak the requested protocol.
    #[error("accessory {device} does not support protocol {protocol}")]
    UnsupportedProtocol { device: DeviceId, protocol: String },

    /// The OS refused to open a session for the accessory.
    #[error("failed to open streams: {0}")]
    OpenFailed(String),
}

/// OS-level "connected accessories" directory.
///
/// A subscription is a directory-wide observer: every successful
/// [`subscribe`](Self::subscribe) must be matched by exactly one
/// [`unsubscribe`](Self::unsubscribe).
#[cfg_attr(test, mockall::automock)]
pub trait DeviceDirectory: Send + Sync {
    /// Snapshot of the accessories currently connected.
    fn list_connected(&self) -> Vec<DeviceDescriptor>;

    /// Registers `sink` for [`DirectoryEvent`]s.
    fn subscribe(&self, sink: EventSender) -> SubscriptionId;

    /// Removes a registration made by [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, id: SubscriptionId);

    /// Opens the stream pair for `device` speaking `protocol`.  Readiness
    /// events for both halves are posted to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if the accessory is gone, does not speak
    /// the protocol, or the OS refuses the connection.
    fn open_streams(
        &self,
        device: DeviceId,
        protocol: &str,
        sink: EventSender,
    ) -> Result<StreamPair, DirectoryError>;
}
