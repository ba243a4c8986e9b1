//! Relay decision seam
//!
//! Relay selection and duplicate detection live outside the forwarding
//! core. The engine consults a [`RelayDecision`] for every captured frame
//! and only forwards along associates of the ingress interface.

use crate::frame::MacAddr;
use crate::interface::{Interface, InterfaceId};

/// Verdict of the relay decision function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    /// Interfaces the frame should egress on
    pub destinations: Vec<InterfaceId>,
    /// Frame was seen before and must not be relayed
    pub duplicate: bool,
}

impl Decision {
    /// Relay to the given interfaces
    pub fn relay(destinations: Vec<InterfaceId>) -> Self {
        Decision {
            destinations,
            duplicate: false,
        }
    }

    /// Drop as a duplicate
    pub fn duplicate() -> Self {
        Decision {
            destinations: Vec::new(),
            duplicate: true,
        }
    }
}

/// Opaque relay policy oracle
pub trait RelayDecision {
    /// Decide where a frame captured on `ingress` is relayed
    fn decide(
        &mut self,
        frame: &[u8],
        src_link: MacAddr,
        dst_link: MacAddr,
        ingress: &Interface,
    ) -> Decision;
}

impl<F> RelayDecision for F
where
    F: FnMut(&[u8], MacAddr, MacAddr, &Interface) -> Decision,
{
    fn decide(
        &mut self,
        frame: &[u8],
        src_link: MacAddr,
        dst_link: MacAddr,
        ingress: &Interface,
    ) -> Decision {
        self(frame, src_link, dst_link, ingress)
    }
}

/// Relay every frame to every associate of the ingress interface
///
/// Classical flooding without duplicate detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodAssociates;

impl RelayDecision for FloodAssociates {
    fn decide(&mut self, _frame: &[u8], _src: MacAddr, _dst: MacAddr, ingress: &Interface) -> Decision {
        Decision::relay(ingress.associate_targets().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{Mode, RelayType};
    use crate::matcher::Role;
    use crate::topology::Topology;

    #[test]
    fn test_flood_associates() {
        let mut topo = Topology::new();
        topo.add_interface(InterfaceId(1), "a");
        topo.add_interface(InterfaceId(2), "b");
        topo.add_interface(InterfaceId(3), "c");
        let (group, _) = topo.add_interface_group("push", Mode::Push, RelayType::Cf);
        topo.add_group_member(group, InterfaceId(1), Role::Source).unwrap();
        topo.add_group_member(group, InterfaceId(2), Role::Destination).unwrap();
        topo.add_group_member(group, InterfaceId(3), Role::Destination).unwrap();
        topo.update_group_associations(group).unwrap();

        let mut flood = FloodAssociates;
        let ingress = topo.find_interface(InterfaceId(1)).unwrap();
        let decision = flood.decide(&[], MacAddr::default(), MacAddr::BROADCAST, ingress);
        assert_eq!(decision.destinations, vec![InterfaceId(2), InterfaceId(3)]);
        assert!(!decision.duplicate);

        let egress = topo.find_interface(InterfaceId(2)).unwrap();
        assert!(flood.decide(&[], MacAddr::default(), MacAddr::BROADCAST, egress).destinations.is_empty());
    }

    #[test]
    fn test_closure_decision() {
        let iface = Interface::new(InterfaceId(1), "a");
        let mut seen = 0;
        let mut oracle = |_: &[u8], _: MacAddr, _: MacAddr, _: &Interface| {
            seen += 1;
            if seen > 1 {
                Decision::duplicate()
            } else {
                Decision::relay(vec![InterfaceId(2)])
            }
        };

        assert!(!oracle.decide(&[1], MacAddr::default(), MacAddr::default(), &iface).duplicate);
        assert!(oracle.decide(&[1], MacAddr::default(), MacAddr::default(), &iface).duplicate);
    }
}
