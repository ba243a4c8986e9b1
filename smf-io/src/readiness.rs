//! Readiness notification state
//!
//! Each transport element registers interest in input and/or output
//! readiness. The engine only tells the transport about transitions, so a
//! repeated start or stop is a no-op.

/// Registered interest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    /// Wake on input readiness
    pub input: bool,
    /// Wake on output readiness
    pub output: bool,
}

impl Interest {
    /// No interest registered
    pub const NONE: Interest = Interest {
        input: false,
        output: false,
    };

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        !self.input && !self.output
    }
}

/// Readiness poll result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Channel is readable
    Readable,
    /// Channel is writable
    Writable,
    /// Channel is both readable and writable
    ReadWrite,
    /// Nothing ready
    None,
}

impl Readiness {
    /// Build from individual flags
    pub fn from_flags(readable: bool, writable: bool) -> Self {
        match (readable, writable) {
            (true, true) => Readiness::ReadWrite,
            (true, false) => Readiness::Readable,
            (false, true) => Readiness::Writable,
            (false, false) => Readiness::None,
        }
    }

    /// Everything the interest asks for
    pub fn from_interest(interest: Interest) -> Self {
        Self::from_flags(interest.input, interest.output)
    }

    /// Input is ready
    pub fn is_readable(&self) -> bool {
        matches!(self, Readiness::Readable | Readiness::ReadWrite)
    }

    /// Output is ready
    pub fn is_writable(&self) -> bool {
        matches!(self, Readiness::Writable | Readiness::ReadWrite)
    }
}

/// Notification transition to apply to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; the transport must be told
    Changed,
    /// Already in the requested state
    Unchanged,
}

impl Transition {
    fn from_change(changed: bool) -> Self {
        if changed {
            Transition::Changed
        } else {
            Transition::Unchanged
        }
    }

    /// Check if the transport must be told
    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed)
    }
}

/// Per-element notification registration
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyState {
    interest: Interest,
}

impl NotifyState {
    /// Create with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interest
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Output notification registered
    pub fn output_active(&self) -> bool {
        self.interest.output
    }

    /// Input notification registered
    pub fn input_active(&self) -> bool {
        self.interest.input
    }

    pub fn start_output(&mut self) -> Transition {
        let changed = !self.interest.output;
        self.interest.output = true;
        Transition::from_change(changed)
    }

    pub fn stop_output(&mut self) -> Transition {
        let changed = self.interest.output;
        self.interest.output = false;
        Transition::from_change(changed)
    }

    pub fn start_input(&mut self) -> Transition {
        let changed = !self.interest.input;
        self.interest.input = true;
        Transition::from_change(changed)
    }

    pub fn stop_input(&mut self) -> Transition {
        let changed = self.interest.input;
        self.interest.input = false;
        Transition::from_change(changed)
    }
}
