//! Mirror Transmission
//!
//! Send the same frame on every TX-enabled element. The frame counts as
//! sent when any element accepted it; a failing element never prevents
//! attempts on the ones after it.

use crate::element::{SendOutcome, TransportElement};
use smf_core::MacAddr;

/// Per-call mirror result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSendResult {
    /// Elements the frame was offered to
    pub attempted: usize,
    /// Elements that accepted the frame
    pub accepted: usize,
    /// Elements that reported would-block
    pub blocked: usize,
    /// Names of elements that failed hard
    pub failed: Vec<String>,
}

impl MirrorSendResult {
    /// Overall outcome: any acceptance wins, then would-block, then error
    pub fn outcome(&self) -> SendOutcome {
        if self.accepted > 0 {
            SendOutcome::Ok
        } else if self.blocked > 0 {
            SendOutcome::Blocked
        } else {
            SendOutcome::Error
        }
    }
}

/// Offer `frame` to every TX-enabled element
pub fn send(
    elements: &mut [TransportElement],
    frame: &[u8],
    source: Option<MacAddr>,
) -> MirrorSendResult {
    let mut result = MirrorSendResult::default();

    for element in elements.iter_mut().filter(|e| e.is_tx_enabled()) {
        result.attempted += 1;
        match element.send(frame, source) {
            SendOutcome::Ok => result.accepted += 1,
            SendOutcome::Blocked => result.blocked += 1,
            SendOutcome::Error => result.failed.push(element.name().to_string()),
        }
    }

    if result.accepted > 0 && !result.failed.is_empty() {
        tracing::debug!(
            accepted = result.accepted,
            failed = result.failed.len(),
            "partial mirror send"
        );
    }

    result
}
