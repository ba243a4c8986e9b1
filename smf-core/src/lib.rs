//! SMF Forwarding Core
//!
//! This crate implements the forwarding topology of a MANET multicast
//! forwarding node: interfaces, interface groups and their associate graph,
//! wildcard interface matchers, link-layer frame inspection and the relay
//! decision seam.

pub mod decision;
pub mod frame;
pub mod group;
pub mod interface;
pub mod matcher;
pub mod topology;

pub use decision::{Decision, FloodAssociates, RelayDecision};
pub use frame::{HopCount, MacAddr};
pub use group::{GroupId, GroupPolicy, InterfaceGroup, Mode, RelayType, TokenError};
pub use interface::{Associate, DeviceBinding, Interface, InterfaceFlags, InterfaceId};
pub use matcher::{wildcard_prefix, InterfaceMatcher, LinkInfo, MatcherInsert, MatcherTable, Role};
pub use topology::{AssociationReport, Registration, Topology, TopologyError};
