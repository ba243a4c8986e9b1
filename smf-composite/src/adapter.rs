//! Transmission Adapter
//!
//! Owns the transport elements of one interface's composite device and
//! everything between a frame arriving for that interface and a channel
//! accepting it: the mirror or round-robin policy, pacing against the rate
//! limit, the bounded priority queue, output-readiness waits and
//! backpressure on the bound frame source.
//!
//! The pacing timer is either inactive or armed for one deadline. It never
//! runs while the adapter waits for output readiness.

use crate::element::{ElementStats, SendOutcome, TransportElement};
use crate::mirror;
use crate::queue::{FrameQueue, QueueDepth, Rejected};
use crate::round_robin::RoundRobin;
use crate::source::FrameSource;
use smf_core::{InterfaceId, MacAddr};
use smf_io::{BufferPool, PacingTimer, PooledBuffer, RateLimit};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Adapter errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter has no transport elements")]
    NoElements,

    #[error("Unknown transport element: {0}")]
    UnknownElement(String),

    #[error("Transmission queue is full")]
    QueueFull,

    #[error("Queuing is disabled")]
    QueueDisabled,

    #[error("Buffer pool exhausted")]
    PoolExhausted,

    #[error("Output blocked")]
    Blocked,

    #[error("Transmission suspended")]
    Suspended,

    #[error("Send failed")]
    SendFailed,
}

/// Composite transmission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Every TX-enabled element carries every frame
    #[default]
    Mirror,
    /// Frames rotate across TX-enabled elements
    RoundRobin,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Mirror => "mirror",
            Policy::RoundRobin => "round-robin",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mirror" => Ok(Policy::Mirror),
            "round-robin" | "roundrobin" | "rr" => Ok(Policy::RoundRobin),
            _ => Err(format!("Unknown policy: {}", s)),
        }
    }
}

/// How a frame handed to [`TransmissionAdapter::transmit`] was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by a channel
    Sent,
    /// Waiting in the queue
    Queued,
}

/// Software interface bound to the composite device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifBinding {
    /// Software interface name
    pub name: String,
    /// Its link address
    pub address: MacAddr,
}

/// Adapter statistics
#[derive(Debug, Clone)]
pub struct AdapterStats {
    /// Adapter (interface) name
    pub name: String,
    /// Transmission policy
    pub policy: Policy,
    /// Current rate limit
    pub rate: RateLimit,
    /// Queue depth policy
    pub queue_depth: QueueDepth,
    /// Frames currently queued
    pub queue_len: usize,
    /// Frames accepted by at least one element
    pub frames_sent: u64,
    /// Bytes accepted
    pub bytes_sent: u64,
    /// Frames that entered the queue
    pub frames_queued: u64,
    /// Frames dropped (queue full, disabled, pool empty)
    pub frames_dropped: u64,
    /// Hard send failures
    pub send_errors: u64,
    /// Sends that ended in a readiness wait
    pub blocked_events: u64,
    /// Times the frame source was suspended
    pub backpressure_events: u64,
    /// Per-element statistics
    pub element_stats: Vec<ElementStats>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    frames_sent: u64,
    bytes_sent: u64,
    frames_queued: u64,
    frames_dropped: u64,
    send_errors: u64,
    blocked_events: u64,
    backpressure_events: u64,
}

fn send_frame(
    elements: &mut [TransportElement],
    policy: Policy,
    round_robin: &mut RoundRobin,
    frame: &[u8],
    source: Option<MacAddr>,
) -> SendOutcome {
    match elements.len() {
        0 => SendOutcome::Error,
        1 if elements[0].is_tx_enabled() => elements[0].send(frame, source),
        1 => SendOutcome::Error,
        _ => match policy {
            Policy::Mirror => mirror::send(elements, frame, source).outcome(),
            Policy::RoundRobin => round_robin.send(elements, frame, source).outcome,
        },
    }
}

/// Transmission side of one interface
pub struct TransmissionAdapter {
    owner: InterfaceId,
    name: String,
    elements: Vec<TransportElement>,
    policy: Policy,
    round_robin: RoundRobin,
    vif: Option<VifBinding>,
    shadow: bool,
    rate: RateLimit,
    timer: PacingTimer,
    output_pending: bool,
    queue: FrameQueue,
    source: Option<Box<dyn FrameSource>>,
    source_suspended: bool,
    counters: Counters,
}

impl TransmissionAdapter {
    /// Create an adapter with no elements, mirror policy, no rate limit and
    /// no queuing
    pub fn new(owner: InterfaceId, name: &str) -> Self {
        TransmissionAdapter {
            owner,
            name: name.to_string(),
            elements: Vec::new(),
            policy: Policy::Mirror,
            round_robin: RoundRobin::new(),
            vif: None,
            shadow: false,
            rate: RateLimit::Unlimited,
            timer: PacingTimer::new(),
            output_pending: false,
            queue: FrameQueue::new(QueueDepth::Disabled),
            source: None,
            source_suspended: false,
            counters: Counters::default(),
        }
    }

    pub fn owner(&self) -> InterfaceId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Elements

    /// Attach an element
    pub fn add_element(&mut self, mut element: TransportElement) {
        if element.is_rx_enabled() {
            element.start_input();
        }
        if self.output_pending && element.is_tx_enabled() {
            element.start_output();
        }
        tracing::debug!(adapter = %self.name, element = %element.name(), "element attached");
        self.elements.push(element);
    }

    /// Detach an element by name
    pub fn remove_element(&mut self, name: &str) -> Result<TransportElement, AdapterError> {
        let index = self
            .elements
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| AdapterError::UnknownElement(name.to_string()))?;
        let mut element = self.elements.remove(index);
        element.stop_output();
        self.round_robin.clamp(self.elements.len());
        Ok(element)
    }

    pub fn element(&self, name: &str) -> Option<&TransportElement> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn elements(&self) -> &[TransportElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [TransportElement] {
        &mut self.elements
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Enable or disable transmission on one element
    pub fn set_element_tx(&mut self, name: &str, enabled: bool) -> Result<(), AdapterError> {
        let element = self
            .elements
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| AdapterError::UnknownElement(name.to_string()))?;
        element.set_tx_enabled(enabled);
        if !enabled {
            element.stop_output();
        } else if self.output_pending {
            element.start_output();
        }
        Ok(())
    }

    /// Enable or disable capture on one element
    pub fn set_element_rx(&mut self, name: &str, enabled: bool) -> Result<(), AdapterError> {
        let element = self
            .elements
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| AdapterError::UnknownElement(name.to_string()))?;
        element.set_rx_enabled(enabled);
        Ok(())
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    /// Round-robin cursor position
    pub fn cursor(&self) -> usize {
        self.round_robin.cursor()
    }

    // Software interface

    /// Bind a software interface to this device
    pub fn bind_vif(&mut self, name: &str, address: MacAddr) {
        self.vif = Some(VifBinding {
            name: name.to_string(),
            address,
        });
    }

    pub fn unbind_vif(&mut self) -> Option<VifBinding> {
        self.vif.take()
    }

    pub fn vif(&self) -> Option<&VifBinding> {
        self.vif.as_ref()
    }

    /// Keep original source addresses on transmit
    pub fn set_shadow(&mut self, shadow: bool) {
        self.shadow = shadow;
    }

    pub fn shadow(&self) -> bool {
        self.shadow
    }

    /// Source address override applied on transmit
    pub fn source_override(&self) -> Option<MacAddr> {
        match &self.vif {
            Some(vif) if !self.shadow => Some(vif.address),
            _ => None,
        }
    }

    /// Feed this adapter from `source`
    pub fn bind_source(&mut self, source: Box<dyn FrameSource>) {
        self.source = Some(source);
        self.source_suspended = false;
    }

    pub fn unbind_source(&mut self) -> Option<Box<dyn FrameSource>> {
        self.source_suspended = false;
        self.source.take()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Frame source is suspended by backpressure
    pub fn source_suspended(&self) -> bool {
        self.source_suspended
    }

    // Rate and queue

    pub fn rate_limit(&self) -> RateLimit {
        self.rate
    }

    /// Change the rate limit in bytes per second (-1 unlimited, 0 suspend)
    ///
    /// A pending pacing wait is rescaled by old/new rate so that throughput
    /// has no discontinuity; leaving unlimited or suspended fires the timer
    /// immediately unless the adapter waits for output readiness.
    pub fn set_rate_limit(&mut self, bytes_per_sec: f64, now: Instant) {
        let old = self.rate;
        let new = RateLimit::from_bps(bytes_per_sec);
        self.rate = new;

        match new {
            RateLimit::Suspended => self.timer.cancel(),
            RateLimit::BytesPerSec(new_rate) => {
                if self.timer.is_armed() {
                    if let RateLimit::BytesPerSec(old_rate) = old {
                        self.timer.rescale(now, old_rate / new_rate);
                    }
                } else if !old.is_paced() && !self.output_pending {
                    self.timer.arm(now, Duration::ZERO);
                }
            }
            RateLimit::Unlimited => {
                if !self.output_pending && (self.timer.is_armed() || old.is_suspended()) {
                    self.timer.arm(now, Duration::ZERO);
                }
            }
        }

        tracing::info!(
            adapter = %self.name,
            old = old.as_bps(),
            new = new.as_bps(),
            "rate limit changed"
        );
    }

    pub fn queue_depth(&self) -> QueueDepth {
        self.queue.depth()
    }

    /// Change the queue depth policy
    pub fn set_queue_depth(&mut self, depth: QueueDepth) {
        let dropped = self.queue.set_depth(depth);
        if dropped > 0 {
            self.counters.frames_dropped += dropped as u64;
            tracing::warn!(adapter = %self.name, dropped, "queue disabled, frames dropped");
        }
        self.resume_source();
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Pending pacing deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Waiting for output readiness
    pub fn output_pending(&self) -> bool {
        self.output_pending
    }

    fn is_idle(&self) -> bool {
        !self.timer.is_armed() && !self.output_pending && !self.rate.is_suspended()
    }

    // Transmission

    /// Transmit one frame now according to the policy
    ///
    /// `Blocked` registers every TX-enabled element for output readiness;
    /// the caller must not retry synchronously.
    pub fn send(&mut self, frame: &[u8]) -> SendOutcome {
        let source = self.source_override();
        let outcome = send_frame(
            &mut self.elements,
            self.policy,
            &mut self.round_robin,
            frame,
            source,
        );
        self.note_outcome(outcome, frame.len());
        outcome
    }

    fn note_outcome(&mut self, outcome: SendOutcome, len: usize) {
        match outcome {
            SendOutcome::Ok => {
                self.counters.frames_sent += 1;
                self.counters.bytes_sent += len as u64;
            }
            SendOutcome::Blocked => {
                self.counters.blocked_events += 1;
                self.wait_for_output();
            }
            SendOutcome::Error => {
                self.counters.send_errors += 1;
                tracing::debug!(adapter = %self.name, len, "transmit failed");
            }
        }
    }

    fn wait_for_output(&mut self) {
        self.output_pending = true;
        self.timer.cancel();
        for element in self.elements.iter_mut().filter(|e| e.is_tx_enabled()) {
            element.start_output();
        }
    }

    /// Deliver a frame routed to this interface
    ///
    /// An idle adapter transmits straight from `frame`; otherwise, or when
    /// the channel refuses it, a copy is queued in a buffer from `pool`.
    pub fn transmit(
        &mut self,
        frame: &[u8],
        priority: bool,
        pool: &BufferPool,
        now: Instant,
    ) -> Result<Delivery, AdapterError> {
        if self.elements.is_empty() {
            return Err(AdapterError::NoElements);
        }

        let refused = if self.is_idle() && self.queue.is_empty() {
            match self.send(frame) {
                SendOutcome::Ok => {
                    self.schedule_next(frame.len(), now);
                    return Ok(Delivery::Sent);
                }
                SendOutcome::Blocked => AdapterError::Blocked,
                SendOutcome::Error => {
                    if self.queue.depth().is_enabled() {
                        self.arm_retry(frame.len(), now);
                    }
                    AdapterError::SendFailed
                }
            }
        } else if self.rate.is_suspended() {
            AdapterError::Suspended
        } else {
            AdapterError::Blocked
        };

        if !self.queue.depth().is_enabled() {
            self.counters.frames_dropped += 1;
            return Err(refused);
        }

        let Some(buf) = pool.get_with(frame) else {
            self.counters.frames_dropped += 1;
            tracing::warn!(adapter = %self.name, "buffer pool exhausted, frame dropped");
            return Err(AdapterError::PoolExhausted);
        };
        self.enqueue(buf, priority)?;
        Ok(Delivery::Queued)
    }

    /// Queue a frame, applying backpressure when the queue fills
    ///
    /// A rejected buffer goes straight back to its pool.
    pub fn enqueue(&mut self, buf: PooledBuffer, priority: bool) -> Result<(), AdapterError> {
        match self.queue.push(buf, priority) {
            Ok(()) => {
                self.counters.frames_queued += 1;
                if self.queue.is_full() {
                    self.suspend_source();
                }
                Ok(())
            }
            Err(Rejected::Full) => {
                self.counters.frames_dropped += 1;
                tracing::warn!(adapter = %self.name, len = self.queue.len(), "queue full, frame dropped");
                self.suspend_source();
                Err(AdapterError::QueueFull)
            }
            Err(Rejected::Disabled) => {
                self.counters.frames_dropped += 1;
                Err(AdapterError::QueueDisabled)
            }
        }
    }

    fn suspend_source(&mut self) {
        if self.source_suspended {
            return;
        }
        if let Some(source) = self.source.as_mut() {
            source.suspend();
            self.source_suspended = true;
            self.counters.backpressure_events += 1;
            tracing::debug!(adapter = %self.name, "frame source suspended");
        }
    }

    fn resume_source(&mut self) {
        if !self.source_suspended {
            return;
        }
        if self.queue.depth().is_enabled() && self.queue.is_full() {
            return;
        }
        if let Some(source) = self.source.as_mut() {
            source.resume();
            tracing::debug!(adapter = %self.name, "frame source resumed");
        }
        self.source_suspended = false;
    }

    fn has_work(&self) -> bool {
        !self.queue.is_empty() || (self.source.is_some() && !self.source_suspended)
    }

    fn schedule_next(&mut self, len: usize, now: Instant) {
        match self.rate {
            RateLimit::BytesPerSec(_) => match self.rate.interval_for(len) {
                Some(gap) => self.timer.arm(now, gap),
                None => self.timer.cancel(),
            },
            RateLimit::Unlimited if self.has_work() => self.timer.arm(now, Duration::ZERO),
            _ => self.timer.cancel(),
        }
    }

    fn arm_retry(&mut self, len: usize, now: Instant) {
        match self.rate.retry_delay(len) {
            Some(delay) => self.timer.arm(now, delay),
            None => self.timer.cancel(),
        }
    }

    /// Fire the pacing timer if it is due
    pub fn on_timer(&mut self, now: Instant) -> bool {
        if !self.timer.fire(now) {
            return false;
        }
        if !self.output_pending {
            self.service(now);
        }
        true
    }

    /// Output readiness reported by an element
    pub fn on_output_ready(&mut self, now: Instant) {
        if !self.output_pending {
            return;
        }
        self.output_pending = false;
        for element in self.elements.iter_mut() {
            element.stop_output();
        }
        if !self.rate.is_suspended() && !self.timer.is_armed() {
            self.service(now);
        }
    }

    /// The bound frame source has input
    pub fn on_source_ready(&mut self, now: Instant) {
        if self.is_idle() {
            self.service(now);
        }
    }

    fn service(&mut self, now: Instant) {
        if self.rate.is_suspended() {
            self.timer.cancel();
            return;
        }

        let source = self.source_override();
        if let Some(front) = self.queue.front() {
            let len = front.len();
            let outcome = send_frame(
                &mut self.elements,
                self.policy,
                &mut self.round_robin,
                front,
                source,
            );
            self.note_outcome(outcome, len);
            match outcome {
                SendOutcome::Ok => {
                    drop(self.queue.pop());
                    self.resume_source();
                    self.refill();
                    self.schedule_next(len, now);
                }
                SendOutcome::Error => self.arm_retry(len, now),
                SendOutcome::Blocked => {}
            }
            return;
        }

        if self.source_suspended {
            return;
        }
        let Some(frame_source) = self.source.as_mut() else {
            return;
        };
        let Some((buf, priority)) = frame_source.pull() else {
            return;
        };

        let len = buf.len();
        let outcome = send_frame(
            &mut self.elements,
            self.policy,
            &mut self.round_robin,
            &buf,
            source,
        );
        self.note_outcome(outcome, len);
        match outcome {
            SendOutcome::Ok => {
                drop(buf);
                self.schedule_next(len, now);
            }
            SendOutcome::Blocked => {
                let _ = self.enqueue(buf, priority);
            }
            SendOutcome::Error => {
                if self.enqueue(buf, priority).is_ok() {
                    self.arm_retry(len, now);
                }
            }
        }
    }

    fn refill(&mut self) {
        if self.source_suspended || !self.queue.depth().is_enabled() || self.queue.is_full() {
            return;
        }
        let pulled = match self.source.as_mut() {
            Some(source) => source.pull(),
            None => None,
        };
        if let Some((buf, priority)) = pulled {
            let _ = self.enqueue(buf, priority);
        }
    }

    /// Close every element and drop queued frames
    pub fn close(&mut self) {
        self.timer.cancel();
        self.output_pending = false;
        let dropped = self.queue.clear();
        self.counters.frames_dropped += dropped as u64;
        for element in self.elements.iter_mut() {
            element.close();
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            name: self.name.clone(),
            policy: self.policy,
            rate: self.rate,
            queue_depth: self.queue.depth(),
            queue_len: self.queue.len(),
            frames_sent: self.counters.frames_sent,
            bytes_sent: self.counters.bytes_sent,
            frames_queued: self.counters.frames_queued,
            frames_dropped: self.counters.frames_dropped,
            send_errors: self.counters.send_errors,
            blocked_events: self.counters.blocked_events,
            backpressure_events: self.counters.backpressure_events,
            element_stats: self.elements.iter().map(|e| e.stats()).collect(),
        }
    }
}

impl fmt::Debug for TransmissionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionAdapter")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("elements", &self.elements)
            .field("policy", &self.policy)
            .field("rate", &self.rate)
            .field("queue_len", &self.queue.len())
            .field("output_pending", &self.output_pending)
            .finish()
    }
}
