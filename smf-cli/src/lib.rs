//! SMF CLI Library
//!
//! Configuration and statistics support for the forwarding daemon.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, EngineSection, GroupConfig, InterfaceConfig, PolicyConfig};
pub use stats::{display_adapter_stats, format_compact_stats, format_rate, format_uptime, format_volume};
