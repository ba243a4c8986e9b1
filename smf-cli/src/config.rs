//! Configuration file support for the forwarding daemon

use serde::{Deserialize, Serialize};
use smf::topology::{DeviceBinding, GroupPolicy, MacAddr, Mode, RelayType, Role, TopologyError};
use smf::{Engine, EngineConfig, EngineError, Policy, QueueDepth};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

/// Engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Buffers in the shared frame pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Size of each pooled buffer
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// Back-off of an idle event loop turn, in microseconds
    #[serde(default = "default_idle_tick")]
    pub idle_tick_us: u64,
    /// Queue depth of interfaces that do not set one
    #[serde(default = "default_queue")]
    pub default_queue: i64,
}

fn default_pool_size() -> usize {
    1024
}

fn default_frame_size() -> usize {
    2048
}

fn default_idle_tick() -> u64 {
    100
}

fn default_queue() -> i64 {
    64
}

fn default_rate() -> f64 {
    -1.0
}

fn default_relay() -> String {
    RelayType::Cf.as_str().to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            pool_size: default_pool_size(),
            frame_size: default_frame_size(),
            idle_tick_us: default_idle_tick(),
            default_queue: default_queue(),
        }
    }
}

impl EngineSection {
    /// Engine parameters described by this section
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pool_size: self.pool_size,
            frame_size: self.frame_size,
            idle_tick: Duration::from_micros(self.idle_tick_us),
            default_queue: QueueDepth::from_config(self.default_queue),
        }
    }
}

/// Transmission policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyConfig {
    /// Every device transmits every frame
    #[default]
    Mirror,
    /// Devices take turns
    RoundRobin,
}

impl From<PolicyConfig> for Policy {
    fn from(policy: PolicyConfig) -> Self {
        match policy {
            PolicyConfig::Mirror => Policy::Mirror,
            PolicyConfig::RoundRobin => Policy::RoundRobin,
        }
    }
}

impl From<Policy> for PolicyConfig {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Mirror => PolicyConfig::Mirror,
            Policy::RoundRobin => PolicyConfig::RoundRobin,
        }
    }
}

/// Interface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Interface name
    pub name: String,
    /// Single backing device (defaults to the interface name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Backing devices of a composite interface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    /// Software interface feeding the devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vif: Option<String>,
    /// Link address of the software interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vif_address: Option<String>,
    /// Transmission policy across devices
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Local addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
    #[serde(default)]
    pub reliable: bool,
    #[serde(default)]
    pub layered: bool,
    /// Keep the original source address of software-interface frames
    #[serde(default)]
    pub shadow: bool,
    #[serde(default)]
    pub block_igmp: bool,
    /// Close capture when the interface only egresses
    #[serde(default)]
    pub divert_output: bool,
    /// Bytes per second; -1 unlimited, 0 suspended
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Queue depth; 0 none, negative unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<i64>,
}

impl InterfaceConfig {
    /// Interface backed by the device of the same name
    pub fn new(name: impl Into<String>) -> Self {
        InterfaceConfig {
            name: name.into(),
            device: None,
            devices: Vec::new(),
            vif: None,
            vif_address: None,
            policy: PolicyConfig::default(),
            addresses: Vec::new(),
            reliable: false,
            layered: false,
            shadow: false,
            block_igmp: false,
            divert_output: false,
            rate: default_rate(),
            queue: None,
        }
    }

    /// Devices backing the interface
    pub fn device_list(&self) -> Vec<String> {
        if !self.devices.is_empty() {
            return self.devices.clone();
        }
        vec![self.device.clone().unwrap_or_else(|| self.name.clone())]
    }
}

/// Group configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name
    pub name: String,
    /// `push`, `merge` or `relay`
    pub mode: String,
    /// Relay algorithm token
    #[serde(default = "default_relay")]
    pub relay: String,
    /// Push source; may be a wildcard `prefix#`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Members; may contain wildcards
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub elastic: bool,
    #[serde(default)]
    pub unicast: bool,
    #[serde(default)]
    pub etx: bool,
    #[serde(default)]
    pub resequence: bool,
    /// Forward without decrementing the hop count
    #[serde(default)]
    pub tunnel: bool,
}

impl GroupConfig {
    fn policy(&self) -> GroupPolicy {
        GroupPolicy {
            elastic: self.elastic,
            unicast: self.unicast,
            etx: self.etx,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Engine parameters
    #[serde(default)]
    pub engine: EngineSection,
    /// Interfaces
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
    /// Groups
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Build the configured topology on `engine`
    ///
    /// Interfaces are set up before groups so that their flags are in place
    /// for the association passes. Topology conflicts are logged and the
    /// remaining configuration is still applied.
    pub fn apply(&self, engine: &mut Engine, now: Instant) -> Result<(), ConfigError> {
        for iface in &self.interfaces {
            apply_interface(engine, iface, now)?;
        }
        for group in &self.groups {
            apply_group(engine, group)?;
        }
        tracing::info!(
            interfaces = engine.topology().interface_count(),
            groups = engine.topology().group_count(),
            associates = engine.topology().associate_count(),
            "configuration applied"
        );
        Ok(())
    }

    /// Rebuild a configuration from an engine's current state
    ///
    /// Groups instantiated from templates are omitted; the template and its
    /// wildcard source are saved instead.
    pub fn capture(engine: &Engine) -> Self {
        let topology = engine.topology();
        let mut config = Config {
            engine: EngineSection {
                pool_size: engine.config().pool_size,
                frame_size: engine.config().frame_size,
                idle_tick_us: engine.config().idle_tick.as_micros() as u64,
                default_queue: engine.config().default_queue.as_config(),
            },
            ..Config::default()
        };

        let mut interfaces: Vec<_> = topology.interfaces().collect();
        interfaces.sort_by_key(|i| i.id());
        for iface in interfaces {
            let mut entry = InterfaceConfig::new(iface.name());
            let (vif, devices) = match iface.binding() {
                DeviceBinding::Physical(device) => (None, vec![device.clone()]),
                DeviceBinding::Composite(devices) => (None, devices.clone()),
                DeviceBinding::Virtual { vif, devices } => (Some(vif.clone()), devices.clone()),
            };
            match devices.as_slice() {
                [device] if device == iface.name() => {}
                [device] => entry.device = Some(device.clone()),
                _ => entry.devices = devices,
            }
            entry.vif = vif;
            entry.addresses = iface.addresses().to_vec();

            let flags = iface.flags();
            entry.reliable = flags.reliable;
            entry.layered = flags.layered;
            entry.block_igmp = flags.block_igmp;
            entry.divert_output = flags.divert_output;

            if let Some(adapter) = engine.adapter(iface.id()) {
                entry.policy = adapter.policy().into();
                entry.shadow = adapter.shadow();
                entry.rate = adapter.rate_limit().as_bps();
                let depth = adapter.queue_depth();
                if depth != engine.config().default_queue {
                    entry.queue = Some(depth.as_config());
                }
                if let Some(binding) = adapter.vif() {
                    entry.vif_address = Some(binding.address.to_string());
                }
            }
            config.interfaces.push(entry);
        }

        let mut groups: Vec<_> = topology
            .groups()
            .filter(|g| g.derived_from().is_none())
            .collect();
        groups.sort_by_key(|g| g.id());
        for group in groups {
            let name_of = |id| topology.find_interface(id).map(|i| i.name().to_string());
            let source_id = group.push_source();

            let mut source = source_id.and_then(name_of);
            let mut members: Vec<String> = group
                .members()
                .filter(|&id| Some(id) != source_id)
                .filter_map(name_of)
                .collect();
            for matcher in topology.matchers().iter().filter(|m| m.group() == group.name()) {
                let wildcard = format!("{}#", matcher.prefix());
                match matcher.role() {
                    Role::Source if group.mode() == Mode::Push => source = Some(wildcard),
                    _ => members.push(wildcard),
                }
            }

            config.groups.push(GroupConfig {
                name: group.name().to_string(),
                mode: group.mode().as_str().to_string(),
                relay: group.relay_type().as_str().to_string(),
                source,
                members,
                elastic: group.policy.elastic,
                unicast: group.policy.unicast,
                etx: group.policy.etx,
                resequence: group.resequence,
                tunnel: group.tunnel,
            });
        }
        config
    }

    /// Small example configuration
    pub fn example() -> Self {
        let mut wan = InterfaceConfig::new("wan0");
        wan.devices = vec!["eth1".to_string(), "eth2".to_string()];
        wan.policy = PolicyConfig::RoundRobin;
        wan.rate = 125_000.0;

        Config {
            engine: EngineSection::default(),
            interfaces: vec![InterfaceConfig::new("wlan0"), wan],
            groups: vec![
                GroupConfig {
                    name: "manet".to_string(),
                    mode: Mode::Relay.as_str().to_string(),
                    relay: RelayType::ECds.as_str().to_string(),
                    source: None,
                    members: vec!["wlan0".to_string(), "wan0".to_string()],
                    elastic: false,
                    unicast: false,
                    etx: false,
                    resequence: false,
                    tunnel: false,
                },
                GroupConfig {
                    name: "ppp".to_string(),
                    mode: Mode::Push.as_str().to_string(),
                    relay: default_relay(),
                    source: Some("ppp#".to_string()),
                    members: vec!["wlan0".to_string()],
                    elastic: false,
                    unicast: false,
                    etx: false,
                    resequence: false,
                    tunnel: true,
                },
            ],
        }
    }
}

fn apply_interface(engine: &mut Engine, iface: &InterfaceConfig, now: Instant) -> Result<(), ConfigError> {
    let name = iface.name.as_str();
    engine.set_devices(name, &iface.device_list())?;
    engine.set_policy(name, iface.policy.into())?;
    engine.set_shadow(name, iface.shadow)?;

    let flags = engine.interface_flags_mut(name)?;
    flags.reliable = iface.reliable;
    flags.layered = iface.layered;
    flags.block_igmp = iface.block_igmp;
    flags.divert_output = iface.divert_output;

    for addr in &iface.addresses {
        engine.add_address(name, *addr)?;
    }
    if let Some(depth) = iface.queue {
        engine.set_queue_depth(name, depth)?;
    }
    engine.set_rate_limit(name, iface.rate, now)?;

    if let Some(vif) = &iface.vif {
        let address = match &iface.vif_address {
            Some(text) => parse_mac(text)?,
            None => {
                return Err(ConfigError::Invalid(format!(
                    "{}: vif {} needs vif_address",
                    name, vif
                )))
            }
        };
        engine.bind_vif(name, vif, address)?;
    }
    Ok(())
}

fn apply_group(engine: &mut Engine, group: &GroupConfig) -> Result<(), ConfigError> {
    let mode: Mode = group
        .mode
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", group.name, e)))?;
    let relay: RelayType = group
        .relay
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", group.name, e)))?;
    if group.source.is_some() && mode != Mode::Push {
        return Err(ConfigError::Invalid(format!(
            "{}: source given to {} group",
            group.name, mode
        )));
    }

    engine.add_interface_group(&group.name, mode, relay);
    engine.set_group_policy(&group.name, group.policy(), group.tunnel, group.resequence)?;

    let members = group
        .source
        .iter()
        .map(|s| (s, Role::Source))
        .chain(group.members.iter().map(|m| (m, Role::Destination)));
    for (member, role) in members {
        match engine.add_group_member(&group.name, member, role) {
            Ok(_) => {}
            Err(EngineError::Topology(e @ TopologyError::TopologyConflict { .. })) => {
                tracing::warn!(group = %group.name, member = %member, "{}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Parse `aa:bb:cc:dd:ee:ff`
pub fn parse_mac(text: &str) -> Result<MacAddr, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("Invalid link address: {}", text));
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(MacAddr(mac))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
