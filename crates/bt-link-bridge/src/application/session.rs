//! The Bluetooth Classic session: discover → connect → exchange bytes.
//!
//! # States
//!
//! ```text
//!  Initial ──discover──► Discovering ──connect──► Connected
//!     │                       │                     │
//!     └───────────────────────┴───── teardown ──────┴──► Closed
//! ```
//!
//! Each state claims only the method that moves it forward (`discover`,
//! `connect`, `send`); everything else falls through to the shared base
//! path in the dispatcher.  `send` outside `Connected` is answered with
//! "No peripheral connected".
//!
//! # Resources
//!
//! A session holds at most one directory subscription (taken on the first
//! `discover`) and at most one stream pair (opened by `connect`).
//! [`BtSession::teardown`] releases both exactly once; it runs on client
//! disconnect, on stream error, when the bound accessory goes away, and
//! from `Drop`.

use std::sync::Arc;

use bt_link_core::protocol::messages::{
    ConnectParams, DiscoverParams, PeripheralDiscovered, METHOD_CONNECT, METHOD_DISCOVER,
    METHOD_SEND, NOTIFY_DID_DISCOVER_PERIPHERAL, NOTIFY_DID_RECEIVE_MESSAGE,
};
use bt_link_core::{
    decode_buffer, encode_buffer, DeviceDescriptor, DeviceId, DiscoveryFilter, RpcError,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::dispatcher::{Call, CallHandler, Outbound, Responder};
use crate::application::stream_io::{StreamIoManager, SESSION_CLOSED};
use crate::domain::{
    DeviceDirectory, DirectoryEvent, EventSender, SessionEvent, SessionSettings, StreamEvent,
    SubscriptionId,
};

/// Error message for `send` before a successful `connect`.
pub const NO_PERIPHERAL_CONNECTED: &str = "No peripheral connected";

/// Observable phase of a [`BtSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Fresh session; only `discover` moves it forward.
    Initial,
    /// Reporting accessories; `connect` binds one.
    Discovering,
    /// Bound to an accessory; `send` writes to it.
    Connected,
    /// Torn down.  Terminal.
    Closed,
}

/// The accessory a session is bound to.
#[derive(Debug)]
pub struct BoundAccessory {
    device: DeviceDescriptor,
    protocol: String,
    io: StreamIoManager,
}

#[derive(Debug)]
enum SessionState {
    Initial,
    Discovering(DiscoveryFilter),
    Connected(Box<BoundAccessory>),
    Closed,
}

/// One client's Bluetooth Classic session.
pub struct BtSession {
    directory: Arc<dyn DeviceDirectory>,
    events: EventSender,
    outbound: Outbound,
    settings: SessionSettings,
    subscription: Option<SubscriptionId>,
    state: SessionState,
}

impl BtSession {
    /// Creates a session in [`SessionPhase::Initial`].
    ///
    /// `events` is the sending half of this session's own event channel;
    /// it is handed to the directory on subscribe and to the streams on
    /// connect.
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        events: EventSender,
        outbound: Outbound,
        settings: SessionSettings,
    ) -> Self {
        Self {
            directory,
            events,
            outbound,
            settings,
            subscription: None,
            state: SessionState::Initial,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Initial => SessionPhase::Initial,
            SessionState::Discovering(_) => SessionPhase::Discovering,
            SessionState::Connected(_) => SessionPhase::Connected,
            SessionState::Closed => SessionPhase::Closed,
        }
    }

    /// `true` once [`teardown`](Self::teardown) has run.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// The accessory this session is bound to, if any.
    pub fn bound_device(&self) -> Option<&DeviceDescriptor> {
        match &self.state {
            SessionState::Connected(bound) => Some(&bound.device),
            _ => None,
        }
    }

    /// Writes waiting for the accessory to accept bytes.
    pub fn queued_writes(&self) -> usize {
        match &self.state {
            SessionState::Connected(bound) => bound.io.queued(),
            _ => 0,
        }
    }

    // ── discover ──────────────────────────────────────────────────────────────

    fn handle_initial(&mut self, call: Call) -> Option<Call> {
        if call.method != METHOD_DISCOVER {
            return Some(call);
        }
        self.discover(call.params, call.responder);
        None
    }

    fn discover(&mut self, params: Value, responder: Responder) {
        let params = match serde_json::from_value::<DiscoverParams>(params) {
            Ok(p) => p,
            Err(e) => {
                responder.resolve(Err(RpcError::InvalidParams(format!(
                    "majorDeviceClass and minorDeviceClass required ({e})"
                ))));
                return;
            }
        };

        let filter = DiscoveryFilter::new(
            params.major_device_class,
            params.minor_device_class,
            params.oui_prefix.as_deref(),
        );
        info!(
            "session {}: discover major={} minor={} oui={:?}",
            self.outbound.session(),
            filter.major_device_class,
            filter.minor_device_class,
            filter.oui_prefix()
        );

        if self.subscription.is_none() {
            self.subscription = Some(self.directory.subscribe(self.events.clone()));
        }
        self.state = SessionState::Discovering(filter);
        self.report_devices();
        responder.resolve(Ok(Value::Null));
    }

    /// Sends one `didDiscoverPeripheral` per matching connected accessory.
    fn report_devices(&self) {
        let SessionState::Discovering(filter) = &self.state else {
            return;
        };
        for device in self
            .directory
            .list_connected()
            .iter()
            .filter(|d| filter.matches(d))
        {
            let params = serde_json::to_value(PeripheralDiscovered::from(device)).unwrap_or_default();
            self.outbound.notify(NOTIFY_DID_DISCOVER_PERIPHERAL, params);
        }
    }

    // ── connect ───────────────────────────────────────────────────────────────

    fn handle_discovering(&mut self, call: Call) -> Option<Call> {
        if call.method != METHOD_CONNECT {
            return Some(call);
        }
        self.connect(call.params, call.responder);
        None
    }

    fn connect(&mut self, params: Value, responder: Responder) {
        let id = match serde_json::from_value::<ConnectParams>(params) {
            Ok(p) => p.peripheral_id,
            Err(_) => {
                responder.resolve(Err(RpcError::InvalidParams("peripheralId required".into())));
                return;
            }
        };

        match self.open_link(id) {
            Some(bound) => {
                info!(
                    "session {}: connected to {} ({}) via {}",
                    self.outbound.session(),
                    bound.device.id,
                    bound.device.name,
                    bound.protocol
                );
                self.state = SessionState::Connected(Box::new(bound));
                responder.resolve(Ok(Value::Null));
            }
            None => responder.resolve(Err(RpcError::InvalidRequest(format!(
                "Device {id} not available for connection"
            )))),
        }
    }

    fn open_link(&self, id: DeviceId) -> Option<BoundAccessory> {
        let session = self.outbound.session();
        let Some(device) = self.directory.list_connected().into_iter().find(|d| d.id == id) else {
            warn!("session {session}: accessory {id} is not connected");
            return None;
        };
        let Some(protocol) = device.preferred_protocol().map(str::to_owned) else {
            warn!("session {session}: accessory {id} advertises no protocol");
            return None;
        };
        match self.directory.open_streams(id, &protocol, self.events.clone()) {
            Ok(pair) => Some(BoundAccessory {
                io: StreamIoManager::new(pair, self.settings, session),
                device,
                protocol,
            }),
            Err(e) => {
                warn!("session {session}: {e}");
                None
            }
        }
    }

    // ── send ──────────────────────────────────────────────────────────────────

    fn handle_connected(&mut self, call: Call) -> Option<Call> {
        if call.method != METHOD_SEND {
            return Some(call);
        }
        let SessionState::Connected(bound) = &mut self.state else {
            return Some(call);
        };

        let data = match decode_buffer(&call.params) {
            Ok(data) => data,
            Err(e) => {
                call.responder.resolve(Err(e.into()));
                return None;
            }
        };
        if let Err(fault) = bound.io.send(data, call.responder) {
            warn!("session {}: {fault}", self.outbound.session());
            self.teardown();
        }
        None
    }

    fn handle_unclaimed(&mut self, call: Call) -> Option<Call> {
        if call.method == METHOD_SEND {
            call.responder
                .resolve(Err(RpcError::io(NO_PERIPHERAL_CONNECTED)));
            return None;
        }
        Some(call)
    }

    // ── events ────────────────────────────────────────────────────────────────

    /// Handles one event from the directory or the bound streams.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Directory(DirectoryEvent::AccessoryConnected(id)) => {
                if matches!(self.state, SessionState::Discovering(_)) {
                    debug!("session {}: accessory {id} appeared", self.outbound.session());
                    self.report_devices();
                }
            }
            SessionEvent::Directory(DirectoryEvent::AccessoryDisconnected(id)) => {
                if self.bound_device().is_some_and(|d| d.id == id) {
                    info!(
                        "session {}: bound accessory {id} went away",
                        self.outbound.session()
                    );
                    self.teardown();
                }
            }
            SessionEvent::Stream(event) => self.handle_stream_event(event),
        }
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        let SessionState::Connected(bound) = &mut self.state else {
            debug!(
                "session {}: stale stream event {event:?}",
                self.outbound.session()
            );
            return;
        };

        match event {
            StreamEvent::OpenCompleted(side) => {
                debug!("session {}: {side:?} stream open", self.outbound.session());
            }
            StreamEvent::HasBytesAvailable => {
                if let Some(data) = bound.io.drain_input() {
                    self.outbound
                        .notify(NOTIFY_DID_RECEIVE_MESSAGE, encode_buffer(&data));
                }
            }
            StreamEvent::HasSpaceAvailable => {
                if let Err(fault) = bound.io.on_space_available() {
                    warn!("session {}: {fault}", self.outbound.session());
                    self.teardown();
                }
            }
            StreamEvent::EndEncountered(side) => {
                debug!("session {}: {side:?} stream ended", self.outbound.session());
            }
            StreamEvent::ErrorOccurred(side) => {
                warn!("session {}: {side:?} stream error", self.outbound.session());
                self.teardown();
            }
        }
    }

    // ── teardown ──────────────────────────────────────────────────────────────

    /// Releases the stream pair and the directory subscription.
    ///
    /// Writes still queued are answered with "Session closed".  Idempotent.
    pub fn teardown(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Closed = previous {
            return;
        }

        if let SessionState::Connected(mut bound) = previous {
            for pending in bound.io.close() {
                pending
                    .into_responder()
                    .resolve(Err(RpcError::io(SESSION_CLOSED)));
            }
            info!(
                "session {}: released accessory {}",
                self.outbound.session(),
                bound.device.id
            );
        }

        if let Some(id) = self.subscription.take() {
            self.directory.unsubscribe(id);
        }
        debug!("session {}: torn down", self.outbound.session());
    }
}

impl CallHandler for BtSession {
    fn handle_call(&mut self, call: Call) -> Option<Call> {
        let unclaimed = match self.state {
            SessionState::Initial => self.handle_initial(call),
            SessionState::Discovering(_) => self.handle_discovering(call),
            SessionState::Connected(_) => self.handle_connected(call),
            SessionState::Closed => Some(call),
        };
        unclaimed.and_then(|call| self.handle_unclaimed(call))
    }
}

impl Drop for BtSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for BtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtSession")
            .field("session", &self.outbound.session())
            .field("phase", &self.phase())
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::ProtocolDispatcher;
    use crate::domain::ports::MockDeviceDirectory;
    use crate::domain::{
        AccessoryInput, AccessoryOutput, DirectoryError, StreamPair, StreamSide,
    };
    use bt_link_core::domain::device::EV3_PROTOCOL;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    // ── fixtures ──────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct Wire {
        has_space: bool,
        accept_limit: Option<usize>,
        written: Vec<u8>,
        inbound: VecDeque<u8>,
        closed: usize,
    }

    type SharedWire = Arc<Mutex<Wire>>;

    struct WireInput(SharedWire);
    struct WireOutput(SharedWire);

    impl AccessoryInput for WireInput {
        fn has_bytes_available(&self) -> bool {
            !self.0.lock().unwrap().inbound.is_empty()
        }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut w = self.0.lock().unwrap();
            let n = buf.len().min(w.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = w.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    impl AccessoryOutput for WireOutput {
        fn has_space_available(&self) -> bool {
            self.0.lock().unwrap().has_space
        }
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let mut w = self.0.lock().unwrap();
            let n = w.accept_limit.map_or(data.len(), |l| l.min(data.len()));
            w.written.extend_from_slice(&data[..n]);
            Ok(n)
        }
        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    fn ev3(id: u64) -> DeviceDescriptor {
        DeviceDescriptor::new(id, "EV3", vec![EV3_PROTOCOL.to_string()])
    }

    struct Harness {
        session: BtSession,
        dispatcher: ProtocolDispatcher,
        rx: UnboundedReceiver<String>,
        _events: UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new(directory: MockDeviceDirectory) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let outbound = Outbound::new(tx, "unit");
            Self {
                session: BtSession::new(
                    Arc::new(directory),
                    events_tx,
                    outbound.clone(),
                    SessionSettings::default(),
                ),
                dispatcher: ProtocolDispatcher::new(outbound),
                rx,
                _events: events_rx,
            }
        }

        fn call(&mut self, id: u64, method: &str, params: Value) {
            let text = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
                .to_string();
            self.dispatcher.handle_text(&text, &mut self.session);
        }

        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                out.push(serde_json::from_str(&text).unwrap());
            }
            out
        }
    }

    /// Directory with `devices`, counting subscribe/unsubscribe exactly once.
    fn directory_with(devices: Vec<DeviceDescriptor>) -> MockDeviceDirectory {
        let mut dir = MockDeviceDirectory::new();
        dir.expect_list_connected()
            .returning(move || devices.clone());
        dir.expect_subscribe().times(1).returning(|_| 42);
        dir.expect_unsubscribe()
            .withf(|id| *id == 42)
            .times(1)
            .return_const(());
        dir
    }

    fn directory_opening(wire: SharedWire) -> MockDeviceDirectory {
        let mut dir = directory_with(vec![ev3(1)]);
        dir.expect_open_streams()
            .withf(|device, protocol, _| *device == 1 && protocol == EV3_PROTOCOL)
            .times(1)
            .returning(move |_, _, _| {
                Ok(StreamPair {
                    input: Box::new(WireInput(wire.clone())),
                    output: Box::new(WireOutput(wire.clone())),
                })
            });
        dir
    }

    fn connected(wire: &SharedWire) -> Harness {
        let mut h = Harness::new(directory_opening(wire.clone()));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.call(2, "connect", json!({"peripheralId": 1}));
        h.frames();
        h
    }

    fn open_wire() -> SharedWire {
        Arc::new(Mutex::new(Wire {
            has_space: true,
            ..Wire::default()
        }))
    }

    // ── discover ──────────────────────────────────────────────────────────────

    #[test]
    fn test_discover_reports_each_device_then_answers() {
        // Arrange
        let mut h = Harness::new(directory_with(vec![ev3(1), DeviceDescriptor::new(2, "Widget", vec!["com.x".into()])]));

        // Act
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));

        // Assert
        let f = h.frames();
        assert_eq!(f.len(), 3);
        assert_eq!(f[0]["method"], "didDiscoverPeripheral");
        assert_eq!(f[0]["params"], json!({"peripheralId": 1, "name": "LEGO MINDSTORMS EV3", "rssi": 127}));
        assert_eq!(f[1]["params"]["name"], "Widget");
        assert_eq!(f[2]["id"], 1);
        assert_eq!(f[2]["result"], Value::Null);
        assert_eq!(h.session.phase(), SessionPhase::Discovering);
    }

    #[test]
    fn test_discover_with_no_devices_answers_null() {
        let mut h = Harness::new(directory_with(Vec::new()));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        let f = h.frames();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0]["result"], Value::Null);
    }

    #[test]
    fn test_discover_missing_minor_class_is_invalid_params() {
        // Arrange: no subscription may be taken
        let mut dir = MockDeviceDirectory::new();
        dir.expect_subscribe().never();
        let mut h = Harness::new(dir);

        // Act
        h.call(1, "discover", json!({"majorDeviceClass": 8}));

        // Assert
        let f = h.frames();
        assert_eq!(f[0]["error"]["code"], -32602);
        assert_eq!(h.session.phase(), SessionPhase::Initial);
    }

    #[test]
    fn test_second_discover_falls_through_to_method_not_found() {
        // Arrange: times(1) on subscribe/unsubscribe checks the invariant
        let mut h = Harness::new(directory_with(vec![ev3(1)]));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();

        // Act
        h.call(2, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));

        // Assert
        let f = h.frames();
        assert_eq!(f.len(), 1, "no second listing");
        assert_eq!(f[0]["id"], 2);
        assert_eq!(f[0]["error"]["code"], -32601);
        assert_eq!(h.session.phase(), SessionPhase::Discovering);
        h.session.teardown();
    }

    #[test]
    fn test_oui_prefix_filters_devices_with_known_address() {
        // Arrange
        let lego = ev3(1).with_address("00:16:53:01:02:03");
        let other = ev3(2).with_address("AA:BB:CC:01:02:03");
        let unknown = ev3(3);
        let mut h = Harness::new(directory_with(vec![lego, other, unknown]));

        // Act
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1, "ouiPrefix": "00:16:53"}));

        // Assert
        let ids: Vec<_> = h
            .frames()
            .into_iter()
            .filter(|f| f["method"] == "didDiscoverPeripheral")
            .map(|f| f["params"]["peripheralId"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_accessory_connected_event_re_reports_while_discovering() {
        // Arrange
        let mut h = Harness::new(directory_with(vec![ev3(1)]));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();

        // Act
        h.session
            .handle_event(SessionEvent::Directory(DirectoryEvent::AccessoryConnected(1)));

        // Assert
        let f = h.frames();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0]["method"], "didDiscoverPeripheral");
    }

    // ── connect ───────────────────────────────────────────────────────────────

    #[test]
    fn test_connect_before_discover_is_method_not_found() {
        let mut dir = MockDeviceDirectory::new();
        dir.expect_open_streams().never();
        let mut h = Harness::new(dir);
        h.call(1, "connect", json!({"peripheralId": 1}));
        assert_eq!(h.frames()[0]["error"]["code"], -32601);
    }

    #[test]
    fn test_connect_binds_the_accessory() {
        // Arrange
        let wire = open_wire();
        let mut h = Harness::new(directory_opening(wire));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();

        // Act
        h.call(2, "connect", json!({"peripheralId": 1}));

        // Assert
        let f = h.frames();
        assert_eq!(f[0]["id"], 2);
        assert_eq!(f[0]["result"], Value::Null);
        assert_eq!(h.session.phase(), SessionPhase::Connected);
        assert_eq!(h.session.bound_device().map(|d| d.id), Some(1));
    }

    #[test]
    fn test_connect_unknown_device_is_invalid_request() {
        // Arrange
        let mut dir = directory_with(vec![ev3(1)]);
        dir.expect_open_streams().never();
        let mut h = Harness::new(dir);
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();

        // Act
        h.call(2, "connect", json!({"peripheralId": 99}));

        // Assert
        let f = h.frames();
        assert_eq!(f[0]["error"]["code"], -32600);
        assert_eq!(h.session.phase(), SessionPhase::Discovering);
    }

    #[test]
    fn test_connect_without_peripheral_id_is_invalid_params() {
        let mut h = Harness::new(directory_with(vec![ev3(1)]));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();
        h.call(2, "connect", json!({}));
        assert_eq!(h.frames()[0]["error"]["code"], -32602);
    }

    #[test]
    fn test_connect_open_failure_is_invalid_request() {
        // Arrange
        let mut dir = directory_with(vec![ev3(1)]);
        dir.expect_open_streams()
            .returning(|_, _, _| Err(DirectoryError::OpenFailed("busy".into())));
        let mut h = Harness::new(dir);
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));
        h.frames();

        // Act
        h.call(2, "connect", json!({"peripheralId": 1}));

        // Assert
        assert_eq!(h.frames()[0]["error"]["code"], -32600);
        assert_eq!(h.session.phase(), SessionPhase::Discovering);
    }

    // ── send ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_send_before_connect_is_no_peripheral_connected() {
        let mut h = Harness::new(MockDeviceDirectory::new());
        h.call(1, "send", json!({"message": "hi"}));
        let f = h.frames();
        assert_eq!(f[0]["error"]["code"], -32500);
        assert_eq!(f[0]["error"]["message"], NO_PERIPHERAL_CONNECTED);
    }

    #[test]
    fn test_send_base64_writes_decoded_bytes() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);

        // Act
        h.call(3, "send", json!({"message": "AQID", "encoding": "base64"}));

        // Assert
        assert_eq!(wire.lock().unwrap().written, vec![1, 2, 3]);
        assert_eq!(h.frames()[0]["result"], 3);
    }

    #[test]
    fn test_send_plain_text_writes_utf8() {
        let wire = open_wire();
        let mut h = connected(&wire);
        h.call(3, "send", json!({"message": "hi"}));
        assert_eq!(wire.lock().unwrap().written, b"hi".to_vec());
        assert_eq!(h.frames()[0]["result"], 2);
    }

    #[test]
    fn test_send_unknown_encoding_is_invalid_params() {
        let wire = open_wire();
        let mut h = connected(&wire);
        h.call(3, "send", json!({"message": "hi", "encoding": "hex"}));
        assert_eq!(h.frames()[0]["error"]["code"], -32602);
        assert!(wire.lock().unwrap().written.is_empty());
    }

    #[test]
    fn test_send_under_backpressure_resolves_after_space_event() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);
        wire.lock().unwrap().has_space = false;

        // Act
        h.call(3, "send", json!({"message": "abc"}));
        assert!(h.frames().is_empty());
        assert_eq!(h.session.queued_writes(), 1);
        wire.lock().unwrap().has_space = true;
        h.session
            .handle_event(SessionEvent::Stream(StreamEvent::HasSpaceAvailable));

        // Assert
        let f = h.frames();
        assert_eq!(f[0]["id"], 3);
        assert_eq!(f[0]["result"], 3);
    }

    #[test]
    fn test_zero_byte_write_tears_down() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);
        wire.lock().unwrap().accept_limit = Some(0);

        // Act
        h.call(3, "send", json!({"message": "abc"}));

        // Assert
        assert_eq!(h.frames()[0]["error"]["message"], "Failed to send message");
        assert!(h.session.is_closed());
        assert_eq!(wire.lock().unwrap().closed, 2);
    }

    // ── receive ───────────────────────────────────────────────────────────────

    #[test]
    fn test_bytes_available_emits_did_receive_message() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);
        wire.lock().unwrap().inbound.extend([0x10, 0x20, 0x30]);

        // Act
        h.session
            .handle_event(SessionEvent::Stream(StreamEvent::HasBytesAvailable));

        // Assert
        let f = h.frames();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0]["method"], "didReceiveMessage");
        assert_eq!(f[0]["params"], json!({"message": "ECAw", "encoding": "base64"}));
        assert!(f[0].get("id").is_none());
    }

    #[test]
    fn test_end_of_input_keeps_session_writable() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);

        // Act
        h.session
            .handle_event(SessionEvent::Stream(StreamEvent::EndEncountered(StreamSide::Input)));
        h.call(3, "send", json!({"message": "abc"}));

        // Assert
        assert_eq!(h.session.phase(), SessionPhase::Connected);
        let f = h.frames();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0]["id"], 3);
        assert_eq!(f[0]["result"], 3);
        assert_eq!(wire.lock().unwrap().written, b"abc".to_vec());
        assert_eq!(wire.lock().unwrap().closed, 0);
    }

    // ── teardown ──────────────────────────────────────────────────────────────

    #[test]
    fn test_stream_error_tears_down_and_fails_queued_sends() {
        // Arrange
        let wire = open_wire();
        let mut h = connected(&wire);
        wire.lock().unwrap().has_space = false;
        h.call(3, "send", json!({"message": "abc"}));

        // Act
        h.session
            .handle_event(SessionEvent::Stream(StreamEvent::ErrorOccurred(StreamSide::Input)));

        // Assert
        let f = h.frames();
        assert_eq!(f[0]["id"], 3);
        assert_eq!(f[0]["error"]["message"], SESSION_CLOSED);
        assert!(h.session.is_closed());
        assert_eq!(wire.lock().unwrap().closed, 2);
    }

    #[test]
    fn test_bound_accessory_disconnect_tears_down() {
        let wire = open_wire();
        let mut h = connected(&wire);
        h.session
            .handle_event(SessionEvent::Directory(DirectoryEvent::AccessoryDisconnected(1)));
        assert!(h.session.is_closed());
    }

    #[test]
    fn test_other_accessory_disconnect_is_ignored() {
        let wire = open_wire();
        let mut h = connected(&wire);
        h.session
            .handle_event(SessionEvent::Directory(DirectoryEvent::AccessoryDisconnected(7)));
        assert_eq!(h.session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        // Arrange: times(1) on unsubscribe and close-count 2 check single release
        let wire = open_wire();
        let mut h = connected(&wire);

        // Act
        h.session.teardown();
        h.session.teardown();
        drop(h);

        // Assert
        assert_eq!(wire.lock().unwrap().closed, 2);
    }

    #[test]
    fn test_drop_releases_subscription() {
        // Arrange: the mock verifies unsubscribe(42) exactly once on drop
        let mut h = Harness::new(directory_with(vec![ev3(1)]));
        h.call(1, "discover", json!({"majorDeviceClass": 8, "minorDeviceClass": 1}));

        // Act / Assert
        drop(h);
    }

    #[test]
    fn test_base_methods_still_answer_while_connected() {
        let wire = open_wire();
        let mut h = connected(&wire);
        h.call(5, "getVersion", json!({}));
        assert_eq!(h.frames()[0]["result"]["protocol"], "1.3");
    }
}
