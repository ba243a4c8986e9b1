//! Priority-aware transmission queue
//!
//! Frames wait here while an adapter is paced, blocked or suspended.
//! Priority frames (control-plane traffic) go ahead of ordinary ones. The
//! queue owns its buffers; a rejected buffer is dropped straight back into
//! the pool.

use smf_io::PooledBuffer;
use std::collections::VecDeque;

/// Queue depth policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueDepth {
    /// No queuing; frames that cannot go out immediately are dropped
    #[default]
    Disabled,
    /// No limit
    Unbounded,
    /// At most this many frames
    Bounded(usize),
}

impl QueueDepth {
    /// Interpret a configured depth: 0 none, negative unbounded, N bounded
    pub fn from_config(depth: i64) -> Self {
        match depth {
            0 => QueueDepth::Disabled,
            d if d < 0 => QueueDepth::Unbounded,
            d => QueueDepth::Bounded(usize::try_from(d).unwrap_or(usize::MAX)),
        }
    }

    /// Configured depth in the same encoding
    pub fn as_config(&self) -> i64 {
        match self {
            QueueDepth::Disabled => 0,
            QueueDepth::Unbounded => -1,
            QueueDepth::Bounded(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }

    /// Check if queuing is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, QueueDepth::Disabled)
    }
}

/// Rejected enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Queuing is disabled
    Disabled,
    /// Bounded queue at capacity
    Full,
}

/// Frame queue with a priority lane
#[derive(Debug, Default)]
pub struct FrameQueue {
    depth: QueueDepth,
    priority: VecDeque<PooledBuffer>,
    ordinary: VecDeque<PooledBuffer>,
}

impl FrameQueue {
    pub fn new(depth: QueueDepth) -> Self {
        FrameQueue {
            depth,
            priority: VecDeque::new(),
            ordinary: VecDeque::new(),
        }
    }

    pub fn depth(&self) -> QueueDepth {
        self.depth
    }

    /// Change the depth policy
    ///
    /// Disabling drops everything queued; shrinking a bound keeps what is
    /// already queued. Returns the number of frames dropped.
    pub fn set_depth(&mut self, depth: QueueDepth) -> usize {
        self.depth = depth;
        if depth.is_enabled() {
            0
        } else {
            self.clear()
        }
    }

    /// Frames queued across both lanes
    pub fn len(&self) -> usize {
        self.priority.len() + self.ordinary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.ordinary.is_empty()
    }

    /// Check if an enqueue would be rejected
    pub fn is_full(&self) -> bool {
        match self.depth {
            QueueDepth::Disabled => true,
            QueueDepth::Unbounded => false,
            QueueDepth::Bounded(n) => self.len() >= n,
        }
    }

    /// Queue a frame; on rejection the buffer returns to its pool
    pub fn push(&mut self, buf: PooledBuffer, priority: bool) -> Result<(), Rejected> {
        if !self.depth.is_enabled() {
            return Err(Rejected::Disabled);
        }
        if self.is_full() {
            return Err(Rejected::Full);
        }
        if priority {
            self.priority.push_back(buf);
        } else {
            self.ordinary.push_back(buf);
        }
        Ok(())
    }

    /// Next frame to transmit
    pub fn front(&self) -> Option<&PooledBuffer> {
        self.priority.front().or_else(|| self.ordinary.front())
    }

    /// Remove the next frame
    pub fn pop(&mut self) -> Option<PooledBuffer> {
        self.priority
            .pop_front()
            .or_else(|| self.ordinary.pop_front())
    }

    /// Drop all queued frames, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.priority.clear();
        self.ordinary.clear();
        dropped
    }
}
