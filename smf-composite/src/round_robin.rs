//! Round-Robin Transmission
//!
//! Distributes frames across TX-enabled elements from a persistent cursor.
//! The first element that accepts a frame wins and the cursor is left just
//! past it, so k sends across k healthy elements visit each exactly once.

use crate::element::{SendOutcome, TransportElement};
use smf_core::MacAddr;

/// Per-call round-robin result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinSendResult {
    /// Overall outcome
    pub outcome: SendOutcome,
    /// Index of the element that accepted the frame
    pub element: Option<usize>,
    /// Elements tried
    pub attempts: usize,
}

/// Persistent round-robin cursor
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next send starts from
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Keep the cursor in range after the element set changed
    pub fn clamp(&mut self, len: usize) {
        if len == 0 || self.cursor >= len {
            self.cursor = 0;
        }
    }

    /// Offer `frame` to one element, starting at the cursor
    ///
    /// A full cycle without acceptance is `Blocked` when any element
    /// reported would-block. It is `Error` when every attempt failed hard
    /// or no element is TX-enabled.
    pub fn send(
        &mut self,
        elements: &mut [TransportElement],
        frame: &[u8],
        source: Option<MacAddr>,
    ) -> RoundRobinSendResult {
        let len = elements.len();
        self.clamp(len);

        let mut attempts = 0;
        let mut blocked = false;

        for step in 0..len {
            let index = (self.cursor + step) % len;
            let element = &mut elements[index];
            if !element.is_tx_enabled() {
                continue;
            }

            attempts += 1;
            match element.send(frame, source) {
                SendOutcome::Ok => {
                    self.cursor = (index + 1) % len;
                    return RoundRobinSendResult {
                        outcome: SendOutcome::Ok,
                        element: Some(index),
                        attempts,
                    };
                }
                SendOutcome::Blocked => blocked = true,
                SendOutcome::Error => {}
            }
        }

        // A hard failure raises no output-readiness event, so a cycle with
        // no would-block must surface as Error for the adapter's paced retry
        let outcome = if blocked {
            SendOutcome::Blocked
        } else {
            SendOutcome::Error
        };

        RoundRobinSendResult {
            outcome,
            element: None,
            attempts,
        }
    }
}
