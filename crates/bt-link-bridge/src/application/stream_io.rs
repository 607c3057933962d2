//! Byte plumbing for one bound accessory.
//!
//! [`StreamIoManager`] owns the input/output halves of a [`StreamPair`] and
//! the FIFO of writes waiting for the output stream to accept bytes.
//!
//! # Write path
//!
//! ```text
//! send(bytes) ── queue empty && space? ──yes──► write now
//!      │                                          │ short write
//!      └──no──► push_back ◄───────────────────────┘ (remainder stays at head)
//!
//! HasSpaceAvailable ──► write head of queue (one write per event)
//! ```
//!
//! Each pending write completes with the total number of bytes once every
//! byte has been accepted.  A write that accepts nothing, or fails, completes
//! with an I/O error and reports a [`StreamFault`] so the session can tear
//! down.
//!
//! # Read path
//!
//! On `HasBytesAvailable` the input is drained in bounded chunks until it
//! reports nothing further; the concatenation is delivered as one message.

use std::collections::VecDeque;
use std::sync::Arc;

use bt_link_core::RpcError;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::dispatcher::Responder;
use crate::domain::{AccessoryInput, AccessoryOutput, SessionSettings, StreamPair};

/// Error message for a write the accessory refused.
pub const FAILED_TO_SEND: &str = "Failed to send message";

/// Error message for writes abandoned when the streams close.
pub const SESSION_CLOSED: &str = "Session closed";

/// A write fault that leaves the stream pair unusable.
#[derive(Debug, Error)]
pub enum StreamFault {
    /// The output stream accepted no bytes.
    #[error("output stream accepted no bytes")]
    Stalled,

    /// The output stream reported an error.
    #[error("output stream write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// A `send` waiting for (the rest of) its bytes to be written.
#[derive(Debug)]
pub struct PendingWrite {
    data: Vec<u8>,
    written: usize,
    responder: Responder,
}

impl PendingWrite {
    fn new(data: Vec<u8>, responder: Responder) -> Self {
        Self {
            data,
            written: 0,
            responder,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.written..]
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Consumes the entry, returning its completion handle.
    pub fn into_responder(self) -> Responder {
        self.responder
    }
}

/// Owns a bound stream pair and its write queue.
pub struct StreamIoManager {
    input: Box<dyn AccessoryInput>,
    output: Box<dyn AccessoryOutput>,
    queue: VecDeque<PendingWrite>,
    read_chunk_size: usize,
    session: Arc<str>,
    closed: bool,
}

impl StreamIoManager {
    /// Takes ownership of `pair`.
    pub fn new(pair: StreamPair, settings: SessionSettings, session: impl Into<Arc<str>>) -> Self {
        Self {
            input: pair.input,
            output: pair.output,
            queue: VecDeque::new(),
            read_chunk_size: settings.read_chunk_size.max(1),
            session: session.into(),
            closed: false,
        }
    }

    /// Number of writes not yet completed.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes `data`, or queues it behind earlier writes.
    ///
    /// An empty payload completes with `0` without touching the stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamFault`] if the immediate write failed; `responder`
    /// has already been resolved with an I/O error in that case.
    pub fn send(&mut self, data: Vec<u8>, responder: Responder) -> Result<(), StreamFault> {
        if self.closed {
            responder.resolve(Err(RpcError::io(FAILED_TO_SEND)));
            return Ok(());
        }
        if data.is_empty() {
            responder.resolve(Ok(json!(0)));
            return Ok(());
        }

        let blocked = !self.queue.is_empty() || !self.output.has_space_available();
        self.queue.push_back(PendingWrite::new(data, responder));
        if blocked {
            debug!(
                "session {}: write queued ({} pending)",
                self.session,
                self.queue.len()
            );
            return Ok(());
        }
        self.write_head()
    }

    /// Handles `HasSpaceAvailable`: one write attempt for the queue head.
    ///
    /// Events can be stale by the time they are handled, so the output is
    /// asked again before writing.
    ///
    /// # Errors
    ///
    /// Returns [`StreamFault`] if the write failed.
    pub fn on_space_available(&mut self) -> Result<(), StreamFault> {
        if self.closed || self.queue.is_empty() {
            return Ok(());
        }
        if !self.output.has_space_available() {
            debug!("session {}: space event with full output; waiting", self.session);
            return Ok(());
        }
        self.write_head()
    }

    fn write_head(&mut self) -> Result<(), StreamFault> {
        let Some(mut pending) = self.queue.pop_front() else {
            return Ok(());
        };

        let outcome = self.output.write(pending.remaining());
        match outcome {
            Ok(0) => {
                pending.responder.resolve(Err(RpcError::io(FAILED_TO_SEND)));
                Err(StreamFault::Stalled)
            }
            Ok(n) => {
                pending.written = (pending.written + n).min(pending.data.len());
                if pending.written == pending.data.len() {
                    debug!("session {}: wrote {} bytes", self.session, pending.written);
                    let total = pending.data.len();
                    pending.responder.resolve(Ok(json!(total)));
                } else {
                    debug!(
                        "session {}: short write {}/{} bytes",
                        self.session,
                        pending.written,
                        pending.data.len()
                    );
                    self.queue.push_front(pending);
                }
                Ok(())
            }
            Err(e) => {
                pending.responder.resolve(Err(RpcError::io(FAILED_TO_SEND)));
                Err(StreamFault::Write(e))
            }
        }
    }

    /// Handles `HasBytesAvailable`: reads until the input is dry.
    ///
    /// Returns `None` when nothing was read, or when a read error cut the
    /// drain short (the partial bytes are discarded).
    pub fn drain_input(&mut self) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }

        let mut collected = Vec::new();
        let mut chunk = vec![0u8; self.read_chunk_size];
        while self.input.has_bytes_available() {
            match self.input.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!(
                        "session {}: read failed, dropping {} bytes: {e}",
                        self.session,
                        collected.len()
                    );
                    return None;
                }
            }
        }

        if collected.is_empty() {
            None
        } else {
            Some(collected)
        }
    }

    /// Closes both streams and hands back the writes that never completed.
    ///
    /// Idempotent: later calls return an empty list.
    pub fn close(&mut self) -> Vec<PendingWrite> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.input.close();
        self.output.close();
        self.queue.drain(..).collect()
    }
}

impl Drop for StreamIoManager {
    fn drop(&mut self) {
        for pending in self.close() {
            pending
                .into_responder()
                .resolve(Err(RpcError::io(SESSION_CLOSED)));
        }
    }
}

impl std::fmt::Debug for StreamIoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIoManager")
            .field("session", &self.session)
            .field("queued", &self.queue.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::Outbound;
    use serde_json::Value;
    use std::io;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// What the scripted output should do on the next write.
    #[derive(Debug, Clone, Copy)]
    enum Step {
        Accept(usize),
        Fail,
    }

    #[derive(Default)]
    struct Script {
        has_space: bool,
        steps: VecDeque<Step>,
        written: Vec<u8>,
        writes: usize,
        inbound: VecDeque<io::Result<Vec<u8>>>,
        closed_input: bool,
        closed_output: bool,
    }

    type Shared = Arc<Mutex<Script>>;

    struct FakeInput(Shared);
    struct FakeOutput(Shared);

    impl AccessoryInput for FakeInput {
        fn has_bytes_available(&self) -> bool {
            !self.0.lock().unwrap().inbound.is_empty()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut s = self.0.lock().unwrap();
            match s.inbound.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        let rest = bytes.split_off(n);
                        s.inbound.push_front(Ok(rest));
                    }
                    Ok(n)
                }
            }
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed_input = true;
        }
    }

    impl AccessoryOutput for FakeOutput {
        fn has_space_available(&self) -> bool {
            self.0.lock().unwrap().has_space
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let mut s = self.0.lock().unwrap();
            s.writes += 1;
            match s.steps.pop_front().unwrap_or(Step::Accept(usize::MAX)) {
                Step::Accept(limit) => {
                    let n = data.len().min(limit);
                    s.written.extend_from_slice(&data[..n]);
                    Ok(n)
                }
                Step::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            }
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed_output = true;
        }
    }

    fn manager(chunk: usize) -> (StreamIoManager, Shared) {
        let script: Shared = Arc::new(Mutex::new(Script {
            has_space: true,
            ..Script::default()
        }));
        let pair = StreamPair {
            input: Box::new(FakeInput(script.clone())),
            output: Box::new(FakeOutput(script.clone())),
        };
        let settings = SessionSettings {
            read_chunk_size: chunk,
        };
        (StreamIoManager::new(pair, settings, "io-test"), script)
    }

    fn responders() -> (Outbound, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbound::new(tx, "io-test"), rx)
    }

    fn responder(outbound: &Outbound, id: u64) -> Responder {
        Responder::new(Some(json!(id)), "send", outbound.clone())
    }

    fn frames(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[test]
    fn test_send_with_space_writes_immediately() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();

        // Act
        io.send(vec![1, 2, 3], responder(&out, 1)).unwrap();

        // Assert
        assert_eq!(script.lock().unwrap().written, vec![1, 2, 3]);
        let f = frames(&mut rx);
        assert_eq!(f[0]["id"], 1);
        assert_eq!(f[0]["result"], 3);
        assert_eq!(io.queued(), 0);
    }

    #[test]
    fn test_send_without_space_is_queued_until_space_event() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        script.lock().unwrap().has_space = false;

        // Act
        io.send(b"abc".to_vec(), responder(&out, 1)).unwrap();

        // Assert: nothing written, nothing answered
        assert_eq!(script.lock().unwrap().writes, 0);
        assert!(frames(&mut rx).is_empty());
        assert_eq!(io.queued(), 1);

        // Act: space arrives
        script.lock().unwrap().has_space = true;
        io.on_space_available().unwrap();

        // Assert
        assert_eq!(frames(&mut rx)[0]["result"], 3);
        assert_eq!(io.queued(), 0);
    }

    #[test]
    fn test_queued_writes_complete_in_fifo_order() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        script.lock().unwrap().has_space = false;

        // Act
        io.send(b"AA".to_vec(), responder(&out, 1)).unwrap();
        io.send(b"BBB".to_vec(), responder(&out, 2)).unwrap();
        script.lock().unwrap().has_space = true;
        io.on_space_available().unwrap();
        io.on_space_available().unwrap();

        // Assert
        let f = frames(&mut rx);
        assert_eq!(f.len(), 2);
        assert_eq!((f[0]["id"].clone(), f[0]["result"].clone()), (json!(1), json!(2)));
        assert_eq!((f[1]["id"].clone(), f[1]["result"].clone()), (json!(2), json!(3)));
        assert_eq!(script.lock().unwrap().written, b"AABBB".to_vec());
    }

    #[test]
    fn test_new_send_waits_behind_non_empty_queue_even_with_space() {
        // Arrange: first write is short, leaving a remainder at the head
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        script.lock().unwrap().steps.push_back(Step::Accept(1));
        io.send(b"xyz".to_vec(), responder(&out, 1)).unwrap();

        // Act
        io.send(b"Q".to_vec(), responder(&out, 2)).unwrap();

        // Assert: second payload was not written ahead of the remainder
        assert_eq!(script.lock().unwrap().written, b"x".to_vec());
        assert_eq!(io.queued(), 2);
        assert!(frames(&mut rx).is_empty());
    }

    #[test]
    fn test_short_write_retries_remainder_and_reports_total() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        {
            let mut s = script.lock().unwrap();
            s.steps.push_back(Step::Accept(2));
            s.steps.push_back(Step::Accept(2));
        }

        // Act
        io.send(b"hello".to_vec(), responder(&out, 7)).unwrap();
        io.on_space_available().unwrap();
        io.on_space_available().unwrap();

        // Assert
        assert_eq!(script.lock().unwrap().written, b"hello".to_vec());
        assert_eq!(script.lock().unwrap().writes, 3);
        let f = frames(&mut rx);
        assert_eq!(f.len(), 1, "exactly one completion for one send");
        assert_eq!(f[0]["result"], 5);
    }

    #[test]
    fn test_empty_payload_completes_with_zero() {
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        io.send(Vec::new(), responder(&out, 1)).unwrap();
        assert_eq!(frames(&mut rx)[0]["result"], 0);
        assert_eq!(script.lock().unwrap().writes, 0);
    }

    #[test]
    fn test_zero_byte_write_is_a_fault() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        script.lock().unwrap().steps.push_back(Step::Accept(0));

        // Act
        let result = io.send(b"abc".to_vec(), responder(&out, 1));

        // Assert
        assert!(matches!(result, Err(StreamFault::Stalled)));
        let f = frames(&mut rx);
        assert_eq!(f[0]["error"]["code"], -32500);
        assert_eq!(f[0]["error"]["message"], FAILED_TO_SEND);
    }

    #[test]
    fn test_write_error_is_a_fault() {
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        script.lock().unwrap().steps.push_back(Step::Fail);
        let result = io.send(b"abc".to_vec(), responder(&out, 1));
        assert!(matches!(result, Err(StreamFault::Write(_))));
        assert_eq!(frames(&mut rx)[0]["error"]["code"], -32500);
    }

    #[test]
    fn test_drain_concatenates_chunks() {
        // Arrange: 300 bytes read through a 128-byte chunk
        let (mut io, script) = manager(128);
        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        script.lock().unwrap().inbound.push_back(Ok(payload.clone()));

        // Act
        let drained = io.drain_input();

        // Assert
        assert_eq!(drained, Some(payload));
    }

    #[test]
    fn test_drain_of_dry_input_is_none() {
        let (mut io, _script) = manager(128);
        assert_eq!(io.drain_input(), None);
    }

    #[test]
    fn test_read_error_discards_partial_drain() {
        // Arrange
        let (mut io, script) = manager(4);
        {
            let mut s = script.lock().unwrap();
            s.inbound.push_back(Ok(vec![1, 2, 3, 4]));
            s.inbound
                .push_back(Err(io::Error::new(io::ErrorKind::Other, "radio noise")));
        }

        // Act / Assert
        assert_eq!(io.drain_input(), None);
    }

    #[test]
    fn test_close_returns_unfinished_writes_once() {
        // Arrange
        let (mut io, script) = manager(128);
        let (out, _rx) = responders();
        script.lock().unwrap().has_space = false;
        io.send(b"1".to_vec(), responder(&out, 1)).unwrap();
        io.send(b"2".to_vec(), responder(&out, 2)).unwrap();

        // Act
        let first = io.close();
        let second = io.close();

        // Assert
        assert!(io.is_closed());
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        let s = script.lock().unwrap();
        assert!(s.closed_input && s.closed_output);
    }

    #[test]
    fn test_close_keeps_progress_of_partial_write() {
        // Arrange: two of five bytes accepted before close
        let (mut io, script) = manager(128);
        let (out, _rx) = responders();
        script.lock().unwrap().steps.push_back(Step::Accept(2));
        io.send(b"hello".to_vec(), responder(&out, 4)).unwrap();

        // Act
        let abandoned = io.close();

        // Assert
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].written(), 2);
    }

    #[test]
    fn test_send_after_close_fails_without_writing() {
        let (mut io, script) = manager(128);
        let (out, mut rx) = responders();
        io.close();
        io.send(b"late".to_vec(), responder(&out, 9)).unwrap();
        assert_eq!(frames(&mut rx)[0]["error"]["code"], -32500);
        assert_eq!(script.lock().unwrap().writes, 0);
    }
}
