//! SMF Composite Devices
//!
//! This crate implements transmission for interfaces backed by one or more
//! physical channels: transport elements, mirror and round-robin policies,
//! the priority queue, and the rate-limited transmission adapter with
//! backpressure on its frame source.

pub mod adapter;
pub mod element;
pub mod mirror;
pub mod queue;
pub mod round_robin;
pub mod source;

pub use adapter::{AdapterError, AdapterStats, Delivery, Policy, TransmissionAdapter, VifBinding};
pub use element::{ElementStats, SendOutcome, TransportElement};
pub use mirror::MirrorSendResult;
pub use queue::{FrameQueue, QueueDepth, Rejected};
pub use round_robin::{RoundRobin, RoundRobinSendResult};
pub use source::{FrameSource, TransportSource};
