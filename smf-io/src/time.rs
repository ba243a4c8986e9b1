//! Pacing and rate utilities
//!
//! Time is always passed in explicitly so that pacing decisions are
//! deterministic under test.

use std::time::{Duration, Instant};

/// Retry delay after a hard transmit failure on an unlimited adapter
pub const ERROR_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Transmit rate of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RateLimit {
    /// No pacing
    #[default]
    Unlimited,
    /// Transmission paused
    Suspended,
    /// Paced to this many bytes per second
    BytesPerSec(f64),
}

impl RateLimit {
    /// Interpret a configured rate: negative is unlimited, zero suspends
    pub fn from_bps(bytes_per_sec: f64) -> Self {
        if bytes_per_sec < 0.0 || bytes_per_sec.is_nan() {
            RateLimit::Unlimited
        } else if bytes_per_sec == 0.0 {
            RateLimit::Suspended
        } else {
            RateLimit::BytesPerSec(bytes_per_sec)
        }
    }

    /// Configured rate as bytes per second (-1 unlimited, 0 suspended)
    pub fn as_bps(&self) -> f64 {
        match self {
            RateLimit::Unlimited => -1.0,
            RateLimit::Suspended => 0.0,
            RateLimit::BytesPerSec(rate) => *rate,
        }
    }

    /// Pacing gap after transmitting `bytes`; `None` when suspended
    pub fn interval_for(&self, bytes: usize) -> Option<Duration> {
        match self {
            RateLimit::Unlimited => Some(Duration::ZERO),
            RateLimit::Suspended => None,
            RateLimit::BytesPerSec(rate) => Some(Duration::from_secs_f64(bytes as f64 / rate)),
        }
    }

    /// Delay before retrying after a failed transmit of `bytes`
    pub fn retry_delay(&self, bytes: usize) -> Option<Duration> {
        match self {
            RateLimit::Unlimited => Some(ERROR_RETRY_DELAY),
            other => other.interval_for(bytes),
        }
    }

    /// Check if pacing is active
    pub fn is_paced(&self) -> bool {
        matches!(self, RateLimit::BytesPerSec(_))
    }

    /// Check if transmission is paused
    pub fn is_suspended(&self) -> bool {
        matches!(self, RateLimit::Suspended)
    }
}

/// One-shot pacing timer
///
/// Holds at most one pending deadline; arming replaces any previous one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingTimer {
    deadline: Option<Instant>,
}

impl PacingTimer {
    /// Create an inactive timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the timer `delay` after `now`
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    /// Deactivate the timer
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Check if a deadline is pending
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Pending deadline
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Check if the deadline has passed
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    /// Consume the deadline if it has passed
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Scale the remaining time by `factor`
    pub fn rescale(&mut self, now: Instant, factor: f64) {
        if let Some(remaining) = self.remaining(now) {
            let scaled = remaining.as_secs_f64() * factor.max(0.0);
            self.deadline = Some(now + Duration::from_secs_f64(scaled));
        }
    }
}
