//! Dispatcher
//!
//! Hands one frame to the transmission adapter of every destination
//! interface. Partial delivery is normal: a failing destination never stops
//! delivery to the rest.

use smf_composite::{Delivery, TransmissionAdapter};
use smf_core::{frame, InterfaceId};
use smf_io::BufferPool;
use std::collections::HashMap;
use std::time::Instant;

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Destinations that transmitted immediately
    pub sent: usize,
    /// Destinations that queued the frame
    pub queued: usize,
    /// Destinations that refused it
    pub failed: Vec<InterfaceId>,
}

impl DispatchReport {
    /// At least one destination accepted or queued the frame
    pub fn delivered(&self) -> bool {
        self.sent + self.queued > 0
    }
}

/// Routes frames to adapters
pub struct Dispatcher<'a> {
    adapters: &'a mut HashMap<InterfaceId, TransmissionAdapter>,
    pool: &'a BufferPool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        adapters: &'a mut HashMap<InterfaceId, TransmissionAdapter>,
        pool: &'a BufferPool,
    ) -> Self {
        Dispatcher { adapters, pool }
    }

    /// Deliver `frame` to every destination; true if any accepted or queued it
    pub fn forward(&mut self, destinations: &[InterfaceId], frame: &[u8], now: Instant) -> bool {
        self.dispatch(destinations, frame, now).delivered()
    }

    /// Deliver `frame` and report per-destination results
    pub fn dispatch(
        &mut self,
        destinations: &[InterfaceId],
        frame: &[u8],
        now: Instant,
    ) -> DispatchReport {
        let priority = frame::is_control(frame);
        let mut report = DispatchReport::default();

        for &dest in destinations {
            let Some(adapter) = self.adapters.get_mut(&dest) else {
                tracing::debug!(%dest, "no adapter for destination");
                report.failed.push(dest);
                continue;
            };

            match adapter.transmit(frame, priority, self.pool, now) {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Queued) => report.queued += 1,
                Err(e) => {
                    tracing::debug!(%dest, adapter = adapter.name(), error = %e, "delivery failed");
                    report.failed.push(dest);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smf_composite::{QueueDepth, TransportElement};
    use smf_io::{ScriptHandle, ScriptedSend, ScriptedTransport};

    fn adapters(count: u32) -> (HashMap<InterfaceId, TransmissionAdapter>, Vec<ScriptHandle>) {
        let mut map = HashMap::new();
        let mut handles = Vec::new();
        for i in 1..=count {
            let name = format!("eth{}", i);
            let mut adapter = TransmissionAdapter::new(InterfaceId(i), &name);
            let (transport, handle) = ScriptedTransport::new(&name);
            adapter.add_element(TransportElement::new(Box::new(transport)));
            map.insert(InterfaceId(i), adapter);
            handles.push(handle);
        }
        (map, handles)
    }

    #[test]
    fn test_partial_delivery() {
        let (mut map, handles) = adapters(3);
        let pool = BufferPool::new(4, 256);
        handles[0].push_outcome(ScriptedSend::Fail);

        let mut dispatcher = Dispatcher::new(&mut map, &pool);
        let dests = [InterfaceId(1), InterfaceId(2), InterfaceId(3)];
        let report = dispatcher.dispatch(&dests, &[0u8; 60], Instant::now());

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, vec![InterfaceId(1)]);
        assert!(report.delivered());
        assert_eq!(handles[2].sent_count(), 1);
    }

    #[test]
    fn test_all_fail() {
        let (mut map, handles) = adapters(2);
        let pool = BufferPool::new(4, 256);
        for h in &handles {
            h.push_outcome(ScriptedSend::WouldBlock);
        }

        let mut dispatcher = Dispatcher::new(&mut map, &pool);
        let dests = [InterfaceId(1), InterfaceId(2), InterfaceId(9)];
        assert!(!dispatcher.forward(&dests, &[0u8; 60], Instant::now()));
    }

    #[test]
    fn test_queued_counts_as_delivered() {
        let (mut map, handles) = adapters(1);
        let pool = BufferPool::new(4, 256);
        if let Some(adapter) = map.get_mut(&InterfaceId(1)) {
            adapter.set_queue_depth(QueueDepth::Bounded(4));
        }
        handles[0].push_outcome(ScriptedSend::WouldBlock);

        let mut dispatcher = Dispatcher::new(&mut map, &pool);
        let report = dispatcher.dispatch(&[InterfaceId(1)], &[0u8; 60], Instant::now());
        assert_eq!(report.queued, 1);
        assert!(report.delivered());
        assert_eq!(pool.outstanding(), 1);
    }
}
