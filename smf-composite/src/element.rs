//! Transport Elements
//!
//! One physical channel within a composite device. An element carries its
//! own TX/RX enables, readiness registration and counters.

use smf_core::MacAddr;
use smf_io::{
    Direction, Interest, NotifyState, Readiness, SendStatus, Transport, TransportError,
};

/// Result of a transmission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame accepted by at least one channel
    Ok,
    /// Channel full; wait for output readiness
    Blocked,
    /// Hard failure unrelated to flow control
    Error,
}

impl SendOutcome {
    /// Check if the frame went out
    pub fn is_ok(&self) -> bool {
        matches!(self, SendOutcome::Ok)
    }
}

/// Statistics for one element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementStats {
    /// Element (device) name
    pub name: String,
    /// Frames accepted by the channel
    pub frames_sent: u64,
    /// Bytes accepted by the channel
    pub bytes_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Hard send failures
    pub failures: u64,
    /// Sends refused with would-block
    pub would_block: u64,
}

/// Physical channel of a composite device
pub struct TransportElement {
    transport: Box<dyn Transport>,
    tx_enabled: bool,
    rx_enabled: bool,
    notify: NotifyState,
    stats: ElementStats,
}

impl TransportElement {
    /// Wrap an open transport; TX and RX start enabled
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let stats = ElementStats {
            name: transport.name().to_string(),
            ..ElementStats::default()
        };
        TransportElement {
            transport,
            tx_enabled: true,
            rx_enabled: true,
            notify: NotifyState::new(),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn is_tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    pub fn set_tx_enabled(&mut self, enabled: bool) {
        self.tx_enabled = enabled;
    }

    pub fn is_rx_enabled(&self) -> bool {
        self.rx_enabled
    }

    /// Enable or disable capture, updating input registration
    pub fn set_rx_enabled(&mut self, enabled: bool) {
        self.rx_enabled = enabled;
        if enabled {
            self.start_input();
        } else {
            self.stop_input();
        }
    }

    /// Transmit one frame, optionally overriding its source address
    pub fn send(&mut self, frame: &[u8], source: Option<MacAddr>) -> SendOutcome {
        let result = match source {
            Some(mac) => self.transport.forward_with_source(frame, mac.0),
            None => self.transport.forward(frame),
        };

        match result {
            Ok(SendStatus::Accepted(n)) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += n as u64;
                SendOutcome::Ok
            }
            Ok(SendStatus::WouldBlock) => {
                self.stats.would_block += 1;
                SendOutcome::Blocked
            }
            Err(e) => {
                self.stats.failures += 1;
                tracing::debug!(element = %self.name(), error = %e, "send failed");
                SendOutcome::Error
            }
        }
    }

    /// Receive one frame into `buf`
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, Direction)>, TransportError> {
        let received = self.transport.recv(buf)?;
        if let Some((n, _)) = received {
            self.stats.frames_received += 1;
            self.stats.bytes_received += n as u64;
        }
        Ok(received)
    }

    /// Poll the channel for the currently registered interest
    pub fn poll(&mut self) -> Readiness {
        let interest = self.notify.interest();
        if interest.is_empty() {
            return Readiness::None;
        }
        self.transport.poll(interest)
    }

    /// Registered interest
    pub fn interest(&self) -> Interest {
        self.notify.interest()
    }

    pub fn start_output(&mut self) {
        if self.notify.start_output().is_changed() {
            self.transport.start_output_notification();
        }
    }

    pub fn stop_output(&mut self) {
        if self.notify.stop_output().is_changed() {
            self.transport.stop_output_notification();
        }
    }

    pub fn start_input(&mut self) {
        if self.notify.start_input().is_changed() {
            self.transport.start_input_notification();
        }
    }

    pub fn stop_input(&mut self) {
        if self.notify.stop_input().is_changed() {
            self.transport.stop_input_notification();
        }
    }

    /// Output notification is registered
    pub fn output_pending(&self) -> bool {
        self.notify.output_active()
    }

    /// Close the channel, dropping any registration
    pub fn close(&mut self) {
        self.stop_output();
        self.stop_input();
        self.transport.close();
    }

    /// Counters snapshot
    pub fn stats(&self) -> ElementStats {
        self.stats.clone()
    }
}

impl std::fmt::Debug for TransportElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportElement")
            .field("name", &self.name())
            .field("tx_enabled", &self.tx_enabled)
            .field("rx_enabled", &self.rx_enabled)
            .field("interest", &self.notify.interest())
            .finish()
    }
}
