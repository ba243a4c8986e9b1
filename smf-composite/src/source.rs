//! Frame sources
//!
//! A frame source feeds an adapter directly, typically the software
//! interface bound to a composite device. Suspending a source is how a full
//! queue pushes back on its producer.

use smf_core::frame;
use smf_io::{BufferPool, PooledBuffer, Transport};

/// Producer of frames for one adapter
pub trait FrameSource {
    /// Next frame and whether it is priority traffic
    fn pull(&mut self) -> Option<(PooledBuffer, bool)>;

    /// Stop producing until resumed
    fn suspend(&mut self);

    /// Start producing again
    fn resume(&mut self);
}

/// Frames read from a transport, e.g. a tap device
pub struct TransportSource {
    transport: Box<dyn Transport>,
    pool: BufferPool,
    exhausted: u64,
}

impl TransportSource {
    /// Read from `transport` into buffers taken from `pool`
    pub fn new(mut transport: Box<dyn Transport>, pool: BufferPool) -> Self {
        transport.start_input_notification();
        TransportSource {
            transport,
            pool,
            exhausted: 0,
        }
    }

    /// Pulls that found the pool empty
    pub fn exhausted(&self) -> u64 {
        self.exhausted
    }
}

impl FrameSource for TransportSource {
    fn pull(&mut self) -> Option<(PooledBuffer, bool)> {
        let Some(mut buf) = self.pool.get() else {
            self.exhausted += 1;
            tracing::warn!(source = %self.transport.name(), "buffer pool exhausted");
            return None;
        };

        let transport = &mut self.transport;
        match buf.fill_with(|space| match transport.recv(space) {
            Ok(Some((n, _))) => Ok(n),
            Ok(None) => Err(None),
            Err(e) => Err(Some(e)),
        }) {
            Ok(_) => {
                let priority = frame::is_control(&buf);
                Some((buf, priority))
            }
            Err(Some(e)) => {
                tracing::debug!(source = %self.transport.name(), error = %e, "source read failed");
                None
            }
            Err(None) => None,
        }
    }

    fn suspend(&mut self) {
        self.transport.stop_input_notification();
    }

    fn resume(&mut self) {
        self.transport.start_input_notification();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smf_io::ScriptedTransport;

    #[test]
    fn test_pull_and_backpressure() {
        let (transport, handle) = ScriptedTransport::new("tap0");
        let pool = BufferPool::new(1, 256);
        let mut source = TransportSource::new(Box::new(transport), pool.clone());
        assert!(handle.input_notification());

        assert!(source.pull().is_none());
        assert_eq!(pool.available(), 1);

        handle.inject(&[0u8; 60]);
        handle.inject(&[0u8; 60]);
        let (buf, priority) = source.pull().unwrap();
        assert_eq!(buf.len(), 60);
        assert!(!priority);

        assert!(source.pull().is_none());
        assert_eq!(source.exhausted(), 1);
        drop(buf);

        source.suspend();
        assert!(!handle.input_notification());
        source.resume();
        assert!(handle.input_notification());
    }
}
