//! SMF I/O and Platform Abstraction
//!
//! This crate provides the channel-level pieces of the forwarder: the
//! transport trait and its UDP and scripted implementations, readiness
//! registration, the frame buffer pool, pacing utilities and host link
//! discovery.

pub mod link;
pub mod pool;
pub mod readiness;
pub mod scripted;
pub mod socket;
pub mod time;
pub mod transport;

pub use link::NetLink;
pub use pool::{BufferPool, PooledBuffer};
pub use readiness::{Interest, NotifyState, Readiness, Transition};
pub use scripted::{ScriptHandle, ScriptedFactory, ScriptedSend, ScriptedTransport};
pub use socket::{UdpTransport, UdpTransportFactory};
pub use time::{PacingTimer, RateLimit, ERROR_RETRY_DELAY};
pub use transport::{Direction, SendStatus, Transport, TransportError, TransportFactory};
