//! Scripted in-memory transport
//!
//! Plays back a queue of send outcomes and records every frame handed to
//! it. The paired [`ScriptHandle`] stays with the test while the transport
//! itself is moved into an adapter.

use crate::readiness::{Interest, Readiness};
use crate::transport::{Direction, SendStatus, Transport, TransportError, TransportFactory};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Outcome of one scripted send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedSend {
    /// Frame accepted
    Accept,
    /// Channel full
    WouldBlock,
    /// Hard failure
    Fail,
}

#[derive(Debug)]
struct ScriptState {
    outcomes: VecDeque<ScriptedSend>,
    default: ScriptedSend,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<(Vec<u8>, Direction)>,
    writable: bool,
    output_notification: bool,
    input_notification: bool,
    closed: bool,
}

impl Default for ScriptState {
    fn default() -> Self {
        ScriptState {
            outcomes: VecDeque::new(),
            default: ScriptedSend::Accept,
            sent: Vec::new(),
            inbound: VecDeque::new(),
            writable: true,
            output_notification: false,
            input_notification: false,
            closed: false,
        }
    }
}

/// Test-side view of a [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Queue the outcome of the next unscripted send
    pub fn push_outcome(&self, outcome: ScriptedSend) {
        self.state.lock().outcomes.push_back(outcome);
    }

    /// Queue several outcomes
    pub fn push_outcomes(&self, outcomes: &[ScriptedSend]) {
        self.state.lock().outcomes.extend(outcomes.iter().copied());
    }

    /// Outcome once the queue is drained
    pub fn set_default(&self, outcome: ScriptedSend) {
        self.state.lock().default = outcome;
    }

    /// Deliver a frame to the receive side
    pub fn inject(&self, frame: &[u8]) {
        self.inject_with(frame, Direction::Inbound);
    }

    /// Deliver a frame with an explicit direction
    pub fn inject_with(&self, frame: &[u8], direction: Direction) {
        self.state
            .lock()
            .inbound
            .push_back((frame.to_vec(), direction));
    }

    /// Set whether polls report output readiness
    pub fn set_writable(&self, writable: bool) {
        self.state.lock().writable = writable;
    }

    /// Frames accepted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Number of frames accepted so far
    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Forget recorded frames
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Output notification currently registered
    pub fn output_notification(&self) -> bool {
        self.state.lock().output_notification
    }

    /// Input notification currently registered
    pub fn input_notification(&self) -> bool {
        self.state.lock().input_notification
    }

    /// Transport has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// In-memory transport with scripted send outcomes
#[derive(Debug)]
pub struct ScriptedTransport {
    name: String,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create a transport and its handle
    pub fn new(name: &str) -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState::default()));
        let transport = ScriptedTransport {
            name: name.to_string(),
            state: state.clone(),
        };
        (transport, ScriptHandle { state })
    }

    fn send(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let outcome = match state.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => state.default,
        };
        match outcome {
            ScriptedSend::Accept => {
                state.sent.push(frame.to_vec());
                Ok(SendStatus::Accepted(frame.len()))
            }
            ScriptedSend::WouldBlock => Ok(SendStatus::WouldBlock),
            ScriptedSend::Fail => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted failure",
            ))),
        }
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, Direction)>, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let Some((frame, direction)) = state.inbound.pop_front() else {
            return Ok(None);
        };
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(Some((n, direction)))
    }

    fn forward(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        self.send(frame)
    }

    fn forward_with_source(
        &mut self,
        frame: &[u8],
        source: [u8; 6],
    ) -> Result<SendStatus, TransportError> {
        let mut rewritten = frame.to_vec();
        if let Some(bytes) = rewritten.get_mut(6..12) {
            bytes.copy_from_slice(&source);
        }
        self.send(&rewritten)
    }

    fn poll(&mut self, interest: Interest) -> Readiness {
        let state = self.state.lock();
        Readiness::from_flags(
            interest.input && !state.inbound.is_empty(),
            interest.output && state.writable,
        )
    }

    fn start_output_notification(&mut self) {
        self.state.lock().output_notification = true;
    }

    fn stop_output_notification(&mut self) {
        self.state.lock().output_notification = false;
    }

    fn start_input_notification(&mut self) {
        self.state.lock().input_notification = true;
    }

    fn stop_input_notification(&mut self) {
        self.state.lock().input_notification = false;
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

/// Factory handing out [`ScriptedTransport`]s and remembering their handles
#[derive(Debug, Default, Clone)]
pub struct ScriptedFactory {
    handles: Arc<Mutex<HashMap<String, ScriptHandle>>>,
    refuse: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the most recent transport opened for `device`
    pub fn handle(&self, device: &str) -> Option<ScriptHandle> {
        self.handles.lock().get(device).cloned()
    }

    /// Make opens of `device` fail
    pub fn refuse(&self, device: &str) {
        self.refuse.lock().push(device.to_string());
    }
}

impl TransportFactory for ScriptedFactory {
    fn open(&mut self, device: &str) -> Result<Box<dyn Transport>, TransportError> {
        if self.refuse.lock().iter().any(|d| d == device) {
            return Err(TransportError::InvalidDevice(device.to_string()));
        }
        let (transport, handle) = ScriptedTransport::new(device);
        self.handles.lock().insert(device.to_string(), handle);
        Ok(Box::new(transport))
    }
}
