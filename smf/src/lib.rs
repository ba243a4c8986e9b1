//! SMF - Simplified Multicast Forwarding
//!
//! High-level forwarding engine for MANET multicast relaying over plain,
//! composite and virtual interfaces.

pub use smf_core as topology;
pub use smf_composite as composite;
pub use smf_io as io;

pub mod dispatcher;
pub mod engine;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use engine::{Engine, EngineConfig, EngineError, EngineStats};

// Re-export commonly used types
pub use smf_composite::{AdapterStats, Policy, QueueDepth, TransmissionAdapter};
pub use smf_core::{
    Decision, GroupId, GroupPolicy, InterfaceId, LinkInfo, MacAddr, Mode, RelayDecision,
    RelayType, Role, Topology,
};
