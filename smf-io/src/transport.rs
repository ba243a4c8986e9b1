//! Transport channels
//!
//! A transport is one physical capture-and-transmit channel. Sends never
//! block: a full channel reports `SendStatus::WouldBlock` and the caller
//! registers for output readiness instead of retrying.

use crate::readiness::{Interest, Readiness};
use std::io;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is closed")]
    Closed,

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Operation not supported on this platform")]
    Unsupported,
}

/// Outcome of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Frame handed to the channel
    Accepted(usize),
    /// Channel is full, nothing consumed
    WouldBlock,
}

/// Direction of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the link
    Inbound,
    /// Sent by this host (seen by promiscuous capture)
    Outbound,
}

/// Capture-and-transmit channel
pub trait Transport {
    /// Device name
    fn name(&self) -> &str;

    /// Receive one frame; `Ok(None)` when nothing is pending
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, Direction)>, TransportError>;

    /// Transmit a frame unchanged
    fn forward(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError>;

    /// Transmit a frame with its link source address replaced
    fn forward_with_source(
        &mut self,
        frame: &[u8],
        source: [u8; 6],
    ) -> Result<SendStatus, TransportError>;

    /// Report which of the registered interests are ready
    ///
    /// The default reports every registered interest as ready; callers
    /// discover the real state from `recv`/`forward`.
    fn poll(&mut self, interest: Interest) -> Readiness {
        Readiness::from_interest(interest)
    }

    /// Begin output-readiness notification
    fn start_output_notification(&mut self) {}

    /// End output-readiness notification
    fn stop_output_notification(&mut self) {}

    /// Begin input-readiness notification
    fn start_input_notification(&mut self) {}

    /// End input-readiness notification
    fn stop_input_notification(&mut self) {}

    /// Release the channel
    fn close(&mut self);
}

/// Opens transports by device name
pub trait TransportFactory {
    /// Open the channel for `device`
    fn open(&mut self, device: &str) -> Result<Box<dyn Transport>, TransportError>;
}
