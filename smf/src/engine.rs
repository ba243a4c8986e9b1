//! Forwarding Engine
//!
//! Ties the topology to the transmission side. The engine owns the
//! interface/group arena, one transmission adapter per interface, the
//! shared buffer pool and the relay decision oracle. It is driven by
//! [`Engine::poll`], one cooperative loop turn at a time; nothing in a turn
//! blocks.
//!
//! Ingress path for every captured frame:
//!
//! 1. drop IGMP when the ingress interface blocks it
//! 2. consult the relay decision; drop duplicates
//! 3. keep destinations reachable over an associate of the ingress
//!    interface (unicast frames only through groups relaying unicast)
//! 4. decrement the hop count unless the owning group is a tunnel
//! 5. hand off to the [`Dispatcher`]

use crate::dispatcher::{DispatchReport, Dispatcher};
use smf_composite::{
    AdapterError, AdapterStats, Policy, QueueDepth, TransmissionAdapter, TransportElement,
    TransportSource,
};
use smf_core::frame::{self, HopCount};
use smf_core::{
    wildcard_prefix, AssociationReport, DeviceBinding, FloodAssociates, GroupId, GroupPolicy,
    InterfaceFlags, InterfaceId, LinkInfo, MacAddr, Mode, Registration, RelayDecision, RelayType,
    Role, Topology, TopologyError,
};
use smf_io::{link, BufferPool, Direction, TransportError, TransportFactory};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Interface indices handed to names the host does not (yet) know
const SYNTHETIC_BASE: u32 = 0x8000_0000;

/// Frames drained from one element per loop turn
const RECV_BUDGET: usize = 64;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Unknown interface: {0}")]
    UnknownInterface(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Buffers in the shared frame pool
    pub pool_size: usize,
    /// Size of each pooled buffer
    pub frame_size: usize,
    /// Back-off of a run loop turn that captured nothing
    pub idle_tick: Duration,
    /// Queue depth given to new adapters
    pub default_queue: QueueDepth,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pool_size: 1024,
            frame_size: 2048,
            idle_tick: Duration::from_micros(100),
            default_queue: QueueDepth::Bounded(64),
        }
    }
}

/// Ingress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames captured
    pub frames_received: u64,
    /// Frames captured while the interface's capture path was closed
    pub capture_closed: u64,
    /// IGMP frames dropped by policy
    pub igmp_blocked: u64,
    /// Frames the decision marked as duplicates
    pub duplicates: u64,
    /// Destinations removed for lacking an associate
    pub unassociated: u64,
    /// Frames whose hop count ran out
    pub expired: u64,
    /// Frames delivered to at least one destination
    pub relayed: u64,
    /// Frames no destination accepted
    pub undelivered: u64,
    /// Receives skipped because the buffer pool was empty
    pub pool_exhausted: u64,
}

/// Forwarding engine
pub struct Engine {
    config: EngineConfig,
    topology: Topology,
    adapters: HashMap<InterfaceId, TransmissionAdapter>,
    pool: BufferPool,
    decision: Box<dyn RelayDecision>,
    factory: Box<dyn TransportFactory>,
    links: HashMap<String, LinkInfo>,
    next_synthetic: u32,
    stats: EngineStats,
}

impl Engine {
    /// Create an engine opening transports through `factory`
    ///
    /// Relay decisions default to [`FloodAssociates`].
    pub fn new(config: EngineConfig, factory: Box<dyn TransportFactory>) -> Self {
        let pool = BufferPool::new(config.pool_size, config.frame_size);
        tracing::info!(
            pool_size = config.pool_size,
            frame_size = config.frame_size,
            "engine created"
        );
        Engine {
            config,
            topology: Topology::new(),
            adapters: HashMap::new(),
            pool,
            decision: Box::new(FloodAssociates),
            factory,
            links: HashMap::new(),
            next_synthetic: SYNTHETIC_BASE,
            stats: EngineStats::default(),
        }
    }

    /// Replace the relay decision oracle
    pub fn set_decision(&mut self, decision: Box<dyn RelayDecision>) {
        self.decision = decision;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Replace the known link table
    pub fn set_links(&mut self, links: impl IntoIterator<Item = LinkInfo>) {
        self.links = links
            .into_iter()
            .map(|link| (link.name.clone(), link))
            .collect();
    }

    /// Read the host's link table
    pub fn refresh_links(&mut self) -> Result<usize, EngineError> {
        let links = link::scan()?;
        let count = links.len();
        self.set_links(
            links
                .into_iter()
                .map(|l| LinkInfo::new(l.name, l.index, l.up)),
        );
        Ok(count)
    }

    /// Known links in index order
    pub fn links(&self) -> Vec<LinkInfo> {
        let mut links: Vec<_> = self.links.values().cloned().collect();
        links.sort_by_key(|l| l.index);
        links
    }

    /// Index for a name: existing interface, host link, or synthetic
    fn id_for(&mut self, name: &str) -> InterfaceId {
        if let Some(iface) = self.topology.find_interface_by_name(name) {
            return iface.id();
        }
        if let Some(link) = self.links.get(name) {
            return InterfaceId(link.index);
        }
        self.next_synthetic += 1;
        InterfaceId(self.next_synthetic)
    }

    /// Link as seen by the topology, with the index it already uses
    fn normalized(&self, link: &LinkInfo) -> LinkInfo {
        match self.topology.find_interface_by_name(&link.name) {
            Some(iface) => LinkInfo::new(link.name.clone(), iface.id().as_raw(), link.up),
            None => link.clone(),
        }
    }

    /// A link came up: resolve wildcard matchers against it
    pub fn on_link_up(&mut self, link: LinkInfo) -> Vec<GroupId> {
        tracing::info!(link = %link.name, index = link.index, "link up");
        self.links.insert(link.name.clone(), link.clone());

        let link = self.normalized(&link);
        let touched = self.topology.match_interface(&link);

        let id = InterfaceId(link.index);
        if self.topology.find_interface(id).is_some() {
            if let Err(e) = self.ensure_adapter(id) {
                tracing::warn!(link = %link.name, error = %e, "cannot open transport");
            }
        }
        self.sync_capture();
        touched
    }

    /// A link went down: destroy its interface
    pub fn on_link_down(&mut self, name: &str) -> bool {
        tracing::info!(link = name, "link down");
        if let Some(link) = self.links.get_mut(name) {
            link.up = false;
        }
        let Some(id) = self.topology.find_interface_by_name(name).map(|i| i.id()) else {
            return false;
        };
        self.destroy_interface(id);
        self.sync_capture();
        true
    }

    fn destroy_interface(&mut self, id: InterfaceId) {
        self.topology.remove_interface(id);
        if let Some(mut adapter) = self.adapters.remove(&id) {
            adapter.close();
        }
    }

    // ------------------------------------------------------------------
    // Interfaces
    // ------------------------------------------------------------------

    /// Find or create an interface by name
    pub fn add_interface(&mut self, name: &str) -> InterfaceId {
        let id = self.id_for(name);
        self.topology.add_interface(id, name);
        self.adapters.entry(id).or_insert_with(|| {
            let mut adapter = TransmissionAdapter::new(id, name);
            adapter.set_queue_depth(self.config.default_queue);
            adapter
        });
        id
    }

    /// Interface index by name
    pub fn interface_id(&self, name: &str) -> Result<InterfaceId, EngineError> {
        self.topology
            .find_interface_by_name(name)
            .map(|i| i.id())
            .ok_or_else(|| EngineError::UnknownInterface(name.to_string()))
    }

    fn adapter_mut(&mut self, name: &str) -> Result<&mut TransmissionAdapter, EngineError> {
        let id = self.interface_id(name)?;
        self.adapters
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownInterface(name.to_string()))
    }

    /// Adapter of an interface
    pub fn adapter(&self, id: InterfaceId) -> Option<&TransmissionAdapter> {
        self.adapters.get(&id)
    }

    /// Open the interface's bound devices if it has no elements yet
    fn ensure_adapter(&mut self, id: InterfaceId) -> Result<(), EngineError> {
        let Some(iface) = self.topology.find_interface(id) else {
            return Ok(());
        };
        let name = iface.name().to_string();
        let devices: Vec<String> = iface.binding().devices().into_iter().map(str::to_string).collect();

        let config_queue = self.config.default_queue;
        let adapter = self.adapters.entry(id).or_insert_with(|| {
            let mut adapter = TransmissionAdapter::new(id, &name);
            adapter.set_queue_depth(config_queue);
            adapter
        });
        if adapter.element_count() > 0 {
            return Ok(());
        }
        for device in devices {
            let transport = self.factory.open(&device)?;
            adapter.add_element(TransportElement::new(transport));
        }
        Ok(())
    }

    /// Back an interface with the given physical devices
    ///
    /// One device makes a plain interface, several a composite one.
    /// Devices no longer listed are closed; new ones are opened.
    pub fn set_devices(&mut self, name: &str, devices: &[String]) -> Result<(), EngineError> {
        if devices.is_empty() {
            return Err(EngineError::InvalidConfig(format!("{}: no devices", name)));
        }
        let id = self.add_interface(name);

        let binding = match self.topology.find_interface(id).map(|i| i.binding().clone()) {
            Some(DeviceBinding::Virtual { vif, .. }) => DeviceBinding::Virtual {
                vif,
                devices: devices.to_vec(),
            },
            _ if devices.len() == 1 => DeviceBinding::Physical(devices[0].clone()),
            _ => DeviceBinding::Composite(devices.to_vec()),
        };
        if let Some(iface) = self.topology.find_interface_mut(id) {
            iface.set_binding(binding);
        }

        let adapter = self
            .adapters
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownInterface(name.to_string()))?;

        let stale: Vec<String> = adapter
            .elements()
            .iter()
            .map(|e| e.name().to_string())
            .filter(|e| !devices.contains(e))
            .collect();
        for device in stale {
            let mut element = adapter.remove_element(&device)?;
            element.close();
        }

        for device in devices {
            if adapter.element(device).is_none() {
                let transport = self.factory.open(device)?;
                adapter.add_element(TransportElement::new(transport));
            }
        }
        tracing::debug!(iface = name, devices = devices.len(), "devices bound");
        Ok(())
    }

    /// Enable or disable transmission on one device of a composite
    pub fn set_device_tx(&mut self, name: &str, device: &str, enabled: bool) -> Result<(), EngineError> {
        self.adapter_mut(name)?.set_element_tx(device, enabled)?;
        Ok(())
    }

    /// Bind a software interface feeding this interface
    ///
    /// Frames read from `vif` are transmitted on the interface's devices.
    /// Unless shadowing, their source address becomes `address`.
    pub fn bind_vif(&mut self, name: &str, vif: &str, address: MacAddr) -> Result<(), EngineError> {
        let id = self.interface_id(name)?;
        let transport = self.factory.open(vif)?;
        let source = TransportSource::new(transport, self.pool.clone());

        if let Some(iface) = self.topology.find_interface_mut(id) {
            let devices = iface.binding().devices().into_iter().map(str::to_string).collect();
            iface.set_binding(DeviceBinding::Virtual {
                vif: vif.to_string(),
                devices,
            });
        }
        let adapter = self.adapter_mut(name)?;
        adapter.bind_vif(vif, address);
        adapter.bind_source(Box::new(source));
        Ok(())
    }

    pub fn set_shadow(&mut self, name: &str, shadow: bool) -> Result<(), EngineError> {
        self.adapter_mut(name)?.set_shadow(shadow);
        Ok(())
    }

    pub fn set_policy(&mut self, name: &str, policy: Policy) -> Result<(), EngineError> {
        self.adapter_mut(name)?.set_policy(policy);
        Ok(())
    }

    /// Rate limit in bytes per second (-1 unlimited, 0 suspended)
    pub fn set_rate_limit(&mut self, name: &str, bytes_per_sec: f64, now: Instant) -> Result<(), EngineError> {
        self.adapter_mut(name)?.set_rate_limit(bytes_per_sec, now);
        Ok(())
    }

    /// Queue depth (0 none, negative unbounded, N bounded)
    pub fn set_queue_depth(&mut self, name: &str, depth: i64) -> Result<(), EngineError> {
        self.adapter_mut(name)?
            .set_queue_depth(QueueDepth::from_config(depth));
        Ok(())
    }

    /// Interface flags for modification
    pub fn interface_flags_mut(&mut self, name: &str) -> Result<&mut InterfaceFlags, EngineError> {
        let id = self.interface_id(name)?;
        self.topology
            .find_interface_mut(id)
            .map(|i| i.flags_mut())
            .ok_or_else(|| EngineError::UnknownInterface(name.to_string()))
    }

    pub fn add_address(&mut self, name: &str, addr: IpAddr) -> Result<(), EngineError> {
        let id = self.interface_id(name)?;
        if let Some(iface) = self.topology.find_interface_mut(id) {
            iface.add_address(addr);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Register a group
    pub fn add_interface_group(&mut self, name: &str, mode: Mode, relay_type: RelayType) -> (GroupId, Registration) {
        self.topology.add_interface_group(name, mode, relay_type)
    }

    fn group_id(&self, name: &str) -> Result<GroupId, EngineError> {
        self.topology
            .find_group_by_name(name)
            .map(|g| g.id())
            .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))
    }

    /// Set a group's policy and tunnel/resequence flags
    pub fn set_group_policy(
        &mut self,
        name: &str,
        policy: GroupPolicy,
        tunnel: bool,
        resequence: bool,
    ) -> Result<(), EngineError> {
        let id = self.group_id(name)?;
        if let Some(group) = self.topology.find_group_mut(id) {
            group.policy = policy;
            group.tunnel = tunnel;
            group.resequence = resequence;
        }
        Ok(())
    }

    /// Add a member (or wildcard `prefix#`) to a group and rebuild its
    /// associates
    ///
    /// Returns the number of interfaces bound.
    pub fn add_group_member(&mut self, group: &str, member: &str, role: Role) -> Result<usize, EngineError> {
        let gid = self.group_id(group)?;

        if let Some(prefix) = wildcard_prefix(member) {
            let matcher = self.topology.add_interface_matcher(gid, prefix, role)?;
            let links: Vec<LinkInfo> = self
                .links()
                .iter()
                .filter(|l| matcher.matches(&l.name))
                .map(|l| self.normalized(l))
                .collect();
            let bound = self.topology.match_existing_interfaces(&matcher, &links);
            for link in links.iter().filter(|l| l.up) {
                let id = InterfaceId(link.index);
                if self.topology.find_interface(id).is_none() {
                    continue;
                }
                if let Err(e) = self.ensure_adapter(id) {
                    tracing::warn!(link = %link.name, error = %e, "cannot open transport");
                }
            }
            self.sync_capture();
            return Ok(bound?);
        }

        let id = self.add_interface(member);
        self.topology.add_group_member(gid, id, role)?;
        self.ensure_adapter(id)?;
        let report = self.topology.update_group_associations(gid);
        self.sync_capture();
        report?;
        Ok(1)
    }

    /// Rebuild a group's associates
    pub fn update_group_associations(&mut self, group: &str) -> Result<AssociationReport, EngineError> {
        let gid = self.group_id(group)?;
        let report = self.topology.update_group_associations(gid);
        self.sync_capture();
        Ok(report?)
    }

    /// Remove a member from a group; its associates stay in place
    pub fn remove_group_member(&mut self, group: &str, member: &str) -> Result<(), EngineError> {
        let gid = self.group_id(group)?;
        let id = self.interface_id(member)?;
        if self.topology.remove_group_member(gid, id)? {
            if let Some(mut adapter) = self.adapters.remove(&id) {
                adapter.close();
            }
        }
        Ok(())
    }

    /// Remove a group, its associates and matchers, and any interface left
    /// in no group
    pub fn remove_interface_group(&mut self, group: &str) -> Result<Vec<InterfaceId>, EngineError> {
        let gid = self.group_id(group)?;
        let destroyed = self.topology.remove_interface_group(gid)?;
        for id in &destroyed {
            if let Some(mut adapter) = self.adapters.remove(id) {
                adapter.close();
            }
        }
        self.sync_capture();
        Ok(destroyed)
    }

    /// Align element capture with each interface's capture state
    fn sync_capture(&mut self) {
        for (id, adapter) in self.adapters.iter_mut() {
            let active = self
                .topology
                .find_interface(*id)
                .map(|i| i.capture_active())
                .unwrap_or(false);
            for element in adapter.elements_mut() {
                if element.is_rx_enabled() != active {
                    element.set_rx_enabled(active);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Forwarding
    // ------------------------------------------------------------------

    /// Deliver a frame to interfaces chosen elsewhere
    pub fn forward(&mut self, destinations: &[InterfaceId], frame: &[u8], now: Instant) -> bool {
        Dispatcher::new(&mut self.adapters, &self.pool).forward(destinations, frame, now)
    }

    /// Run one captured frame through the ingress path
    pub fn ingress(&mut self, ingress: InterfaceId, frame: &mut [u8], now: Instant) -> bool {
        self.stats.frames_received += 1;

        let Some(iface) = self.topology.find_interface(ingress) else {
            return false;
        };
        if !iface.capture_active() {
            self.stats.capture_closed += 1;
            return false;
        }
        if iface.flags().block_igmp && frame::is_igmp(frame) {
            self.stats.igmp_blocked += 1;
            return false;
        }

        let (Some(src), Some(dst)) = (frame::src_mac(frame), frame::dst_mac(frame)) else {
            return false;
        };

        let decision = self.decision.decide(frame, src, dst, iface);
        if decision.duplicate {
            self.stats.duplicates += 1;
            return false;
        }

        let mut plain = Vec::new();
        let mut tunneled = Vec::new();
        for dest in decision.destinations {
            if dest == ingress {
                continue;
            }
            let Some(assoc) = iface.find_associate(dest) else {
                self.stats.unassociated += 1;
                continue;
            };
            let Some(group) = self.topology.find_group(assoc.group) else {
                continue;
            };
            if !dst.is_multicast() && !group.policy.unicast {
                self.stats.unassociated += 1;
                continue;
            }
            if group.tunnel {
                tunneled.push(dest);
            } else {
                plain.push(dest);
            }
        }

        let mut report = DispatchReport::default();
        if !tunneled.is_empty() {
            report = self.dispatch(&tunneled, frame, now);
        }
        if !plain.is_empty() {
            match frame::decrement_hop_count(frame) {
                HopCount::Expired => self.stats.expired += 1,
                HopCount::Decremented(_) | HopCount::NotIp => {
                    let more = self.dispatch(&plain, frame, now);
                    report.sent += more.sent;
                    report.queued += more.queued;
                    report.failed.extend(more.failed);
                }
            }
        }

        if report.delivered() {
            self.stats.relayed += 1;
            true
        } else {
            if !(tunneled.is_empty() && plain.is_empty()) {
                self.stats.undelivered += 1;
            }
            false
        }
    }

    fn dispatch(&mut self, destinations: &[InterfaceId], frame: &[u8], now: Instant) -> DispatchReport {
        Dispatcher::new(&mut self.adapters, &self.pool).dispatch(destinations, frame, now)
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Earliest pending pacing deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.adapters.values().filter_map(|a| a.next_deadline()).min()
    }

    /// Run one loop turn: fire due timers, service readiness, process
    /// captured frames
    ///
    /// Returns the number of frames captured.
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut ids: Vec<InterfaceId> = self.adapters.keys().copied().collect();
        ids.sort();

        let mut captured = Vec::new();
        for id in ids {
            let Some(adapter) = self.adapters.get_mut(&id) else {
                continue;
            };
            adapter.on_timer(now);

            let mut writable = false;
            for element in adapter.elements_mut() {
                let ready = element.poll();
                writable |= ready.is_writable();
                if !ready.is_readable() || !element.is_rx_enabled() {
                    continue;
                }
                for _ in 0..RECV_BUDGET {
                    let Some(mut buf) = self.pool.get() else {
                        self.stats.pool_exhausted += 1;
                        break;
                    };
                    let result = buf.fill_with(|space| match element.recv(space) {
                        Ok(Some((n, Direction::Inbound))) => Ok(n),
                        Ok(Some((_, Direction::Outbound))) => Ok(0),
                        Ok(None) => Err(None),
                        Err(e) => Err(Some(e)),
                    });
                    match result {
                        Ok(0) => continue,
                        Ok(_) => captured.push((id, buf)),
                        Err(Some(e)) => {
                            tracing::debug!(element = %element.name(), error = %e, "receive failed");
                            break;
                        }
                        Err(None) => break,
                    }
                }
            }

            if writable {
                adapter.on_output_ready(now);
            }
            if adapter.has_source() {
                adapter.on_source_ready(now);
            }
        }

        let count = captured.len();
        for (id, mut buf) in captured {
            self.ingress(id, &mut buf, now);
        }
        count
    }

    /// Drive the engine until `shutdown` is set, then close every adapter
    ///
    /// `on_turn` runs at the start of each turn with the turn's time. The
    /// device transports report readiness optimistically, so an idle turn
    /// backs off for at most `idle_tick`, clamped to the next pacing deadline.
    pub fn run<F>(&mut self, shutdown: &AtomicBool, mut on_turn: F)
    where
        F: FnMut(&mut Engine, Instant),
    {
        tracing::info!(interfaces = self.topology.interface_count(), "engine running");
        loop {
            let now = Instant::now();
            on_turn(self, now);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if self.poll(now) > 0 {
                continue;
            }
            let idle = now + self.config.idle_tick;
            let wake = self.next_deadline().map_or(idle, |d| d.min(idle));
            let wait = wake.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        self.shutdown();
    }

    /// Close every adapter
    pub fn shutdown(&mut self) {
        for adapter in self.adapters.values_mut() {
            adapter.close();
        }
        tracing::info!("engine stopped");
    }

    /// Per-adapter statistics in interface order
    pub fn adapter_stats(&self) -> Vec<AdapterStats> {
        let mut ids: Vec<_> = self.adapters.keys().copied().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.adapters.get(id))
            .map(|a| a.stats())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smf_core::Decision;
    use smf_io::{ScriptHandle, ScriptedFactory};

    const GROUP_MAC: [u8; 6] = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01];

    fn ipv4_frame(dst: [u8; 6], proto: u8, ttl: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 42];
        frame[0..6].copy_from_slice(&dst);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45;
        frame[22] = ttl;
        frame[23] = proto;
        frame
    }

    fn engine() -> (Engine, ScriptedFactory) {
        let factory = ScriptedFactory::new();
        let mut engine = Engine::new(EngineConfig::default(), Box::new(factory.clone()));
        engine.set_links(vec![
            LinkInfo::new("eth1", 1, true),
            LinkInfo::new("eth2", 2, true),
            LinkInfo::new("eth3", 3, true),
        ]);
        (engine, factory)
    }

    fn mesh(engine: &mut Engine, members: &[&str]) {
        engine.add_interface_group("mesh", Mode::Merge, RelayType::Cf);
        for m in members {
            engine.add_group_member("mesh", m, Role::Source).unwrap();
        }
    }

    fn handle(factory: &ScriptedFactory, device: &str) -> ScriptHandle {
        factory.handle(device).unwrap()
    }

    #[test]
    fn test_interface_ids_follow_links() {
        let (mut engine, _) = engine();
        assert_eq!(engine.add_interface("eth2"), InterfaceId(2));
        assert_eq!(engine.add_interface("eth2"), InterfaceId(2));

        let other = engine.add_interface("tap7");
        assert!(other.as_raw() > SYNTHETIC_BASE);
        assert!(engine.adapter(other).is_some());
    }

    #[test]
    fn test_mesh_relay_decrements_ttl() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2", "eth3"]);

        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 8));
        assert_eq!(engine.poll(Instant::now()), 1);

        assert_eq!(handle(&factory, "eth1").sent_count(), 0);
        for dev in ["eth2", "eth3"] {
            let sent = handle(&factory, dev).sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0][22], 7);
        }
        assert_eq!(engine.stats().relayed, 1);
    }

    #[test]
    fn test_expired_frame_dropped() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);

        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 1));
        engine.poll(Instant::now());

        assert_eq!(handle(&factory, "eth2").sent_count(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_tunnel_group_keeps_ttl() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        engine
            .set_group_policy("mesh", GroupPolicy::default(), true, false)
            .unwrap();

        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 1));
        engine.poll(Instant::now());

        let sent = handle(&factory, "eth2").sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][22], 1);
    }

    #[test]
    fn test_igmp_blocked() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        engine.interface_flags_mut("eth1").unwrap().block_igmp = true;

        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 2, 1));
        engine.poll(Instant::now());

        assert_eq!(handle(&factory, "eth2").sent_count(), 0);
        assert_eq!(engine.stats().igmp_blocked, 1);
    }

    #[test]
    fn test_duplicate_dropped() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);

        let mut seen = false;
        engine.set_decision(Box::new(
            move |_: &[u8], _: MacAddr, _: MacAddr, iface: &smf_core::Interface| {
                if seen {
                    return Decision::duplicate();
                }
                seen = true;
                Decision::relay(iface.associate_targets().collect())
            },
        ));

        let h = handle(&factory, "eth1");
        h.inject(&ipv4_frame(GROUP_MAC, 17, 8));
        h.inject(&ipv4_frame(GROUP_MAC, 17, 8));
        engine.poll(Instant::now());

        assert_eq!(handle(&factory, "eth2").sent_count(), 1);
        assert_eq!(engine.stats().duplicates, 1);
    }

    #[test]
    fn test_unicast_needs_group_policy() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        let unicast = [0x02, 0, 0, 0, 0, 0x09];

        handle(&factory, "eth1").inject(&ipv4_frame(unicast, 17, 8));
        engine.poll(Instant::now());
        assert_eq!(handle(&factory, "eth2").sent_count(), 0);

        let policy = GroupPolicy {
            unicast: true,
            ..GroupPolicy::default()
        };
        engine.set_group_policy("mesh", policy, false, false).unwrap();
        handle(&factory, "eth1").inject(&ipv4_frame(unicast, 17, 8));
        engine.poll(Instant::now());
        assert_eq!(handle(&factory, "eth2").sent_count(), 1);
    }

    #[test]
    fn test_decision_restricted_to_associates() {
        let (mut engine, factory) = engine();
        engine.add_interface_group("push", Mode::Push, RelayType::Cf);
        engine.add_group_member("push", "eth1", Role::Source).unwrap();
        engine.add_group_member("push", "eth2", Role::Destination).unwrap();
        engine.add_interface("eth3");

        engine.set_decision(Box::new(
            |_: &[u8], _: MacAddr, _: MacAddr, _: &smf_core::Interface| {
                Decision::relay(vec![InterfaceId(2), InterfaceId(3)])
            },
        ));

        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 8));
        engine.poll(Instant::now());

        assert_eq!(handle(&factory, "eth2").sent_count(), 1);
        assert_eq!(engine.stats().unassociated, 1);
    }

    #[test]
    fn test_wildcard_push_follows_link() {
        let (mut engine, factory) = engine();
        engine.add_interface_group("ppp", Mode::Push, RelayType::Cf);
        assert_eq!(engine.add_group_member("ppp", "ppp#", Role::Source).unwrap(), 0);
        engine.add_group_member("ppp", "eth1", Role::Destination).unwrap();

        let touched = engine.on_link_up(LinkInfo::new("ppp0", 10, true));
        assert_eq!(touched.len(), 1);
        assert!(engine.topology().find_group_by_name("ppp:ppp0").is_some());
        assert!(engine.adapter(InterfaceId(10)).is_some());

        handle(&factory, "ppp0").inject(&ipv4_frame(GROUP_MAC, 17, 8));
        engine.poll(Instant::now());
        assert_eq!(handle(&factory, "eth1").sent_count(), 1);

        assert!(engine.on_link_down("ppp0"));
        assert!(engine.topology().find_group_by_name("ppp:ppp0").is_none());
        assert!(engine.adapter(InterfaceId(10)).is_none());
        assert!(handle(&factory, "ppp0").is_closed());
    }

    #[test]
    fn test_wildcard_conflict_still_opens_other_links() {
        let (mut engine, factory) = engine();
        engine.set_links(vec![
            LinkInfo::new("eth1", 1, true),
            LinkInfo::new("ppp0", 10, true),
            LinkInfo::new("ppp1", 11, true),
        ]);
        mesh(&mut engine, &["eth1", "ppp0"]);
        engine.add_interface_group("ppp", Mode::Push, RelayType::Cf);
        engine.add_group_member("ppp", "eth1", Role::Destination).unwrap();

        let err = engine.add_group_member("ppp", "ppp#", Role::Source).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Topology(TopologyError::TopologyConflict { .. })
        ));

        assert!(engine.topology().find_group_by_name("ppp:ppp1").is_some());
        assert!(engine.adapter(InterfaceId(11)).is_some());
        handle(&factory, "ppp1").inject(&ipv4_frame(GROUP_MAC, 17, 8));
        engine.poll(Instant::now());
        assert_eq!(handle(&factory, "eth1").sent_count(), 1);
    }

    #[test]
    fn test_composite_round_robin() {
        let (mut engine, factory) = engine();
        let devices = vec!["d0".to_string(), "d1".to_string()];
        engine.set_devices("wan", &devices).unwrap();
        engine.set_policy("wan", Policy::RoundRobin).unwrap();
        let id = engine.interface_id("wan").unwrap();

        let now = Instant::now();
        for _ in 0..4 {
            assert!(engine.forward(&[id], &[0u8; 60], now));
        }
        assert_eq!(handle(&factory, "d0").sent_count(), 2);
        assert_eq!(handle(&factory, "d1").sent_count(), 2);

        engine.set_device_tx("wan", "d1", false).unwrap();
        assert!(engine.forward(&[id], &[0u8; 60], now));
        assert!(engine.forward(&[id], &[0u8; 60], now));
        assert_eq!(handle(&factory, "d0").sent_count(), 4);
    }

    #[test]
    fn test_set_devices_replaces_stale() {
        let (mut engine, factory) = engine();
        engine
            .set_devices("wan", &["d0".to_string(), "d1".to_string()])
            .unwrap();
        engine.set_devices("wan", &["d1".to_string()]).unwrap();

        let id = engine.interface_id("wan").unwrap();
        assert_eq!(engine.adapter(id).unwrap().element_count(), 1);
        assert!(handle(&factory, "d0").is_closed());
    }

    #[test]
    fn test_refused_device() {
        let (mut engine, factory) = engine();
        factory.refuse("bad0");
        let err = engine.set_devices("bad", &["bad0".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }

    #[test]
    fn test_vif_source_forwarded() {
        let (mut engine, factory) = engine();
        engine.set_devices("wan", &["d0".to_string()]).unwrap();
        let vif_mac = MacAddr([0x02, 0xaa, 0, 0, 0, 0x01]);
        engine.bind_vif("wan", "tap0", vif_mac).unwrap();

        handle(&factory, "tap0").inject(&ipv4_frame(GROUP_MAC, 17, 8));
        engine.poll(Instant::now());

        let sent = handle(&factory, "d0").sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][6..12], &vif_mac.0);
    }

    #[test]
    fn test_rate_limit_arms_deadline() {
        let (mut engine, _) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        assert!(engine.next_deadline().is_none());

        let now = Instant::now();
        engine.set_rate_limit("eth2", 1000.0, now).unwrap();
        assert_eq!(engine.next_deadline(), Some(now));
    }

    #[test]
    fn test_remove_group_closes_adapters() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);

        let destroyed = engine.remove_interface_group("mesh").unwrap();
        assert_eq!(destroyed.len(), 2);
        assert!(handle(&factory, "eth1").is_closed());
        assert!(engine.adapter(InterfaceId(1)).is_none());
    }

    #[test]
    fn test_run_relays_then_closes() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        let shutdown = AtomicBool::new(false);
        let mut turns = 0;

        engine.run(&shutdown, |_, _| {
            turns += 1;
            match turns {
                1 => handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 8)),
                3 => shutdown.store(true, Ordering::Relaxed),
                _ => {}
            }
        });

        assert_eq!(turns, 3);
        assert_eq!(handle(&factory, "eth2").sent_count(), 1);
        assert_eq!(engine.stats().relayed, 1);
        assert!(handle(&factory, "eth1").is_closed());
        assert!(handle(&factory, "eth2").is_closed());
    }

    #[test]
    fn test_run_stops_before_first_poll() {
        let (mut engine, factory) = engine();
        mesh(&mut engine, &["eth1", "eth2"]);
        handle(&factory, "eth1").inject(&ipv4_frame(GROUP_MAC, 17, 8));

        let shutdown = AtomicBool::new(true);
        engine.run(&shutdown, |_, _| {});

        assert_eq!(engine.stats().frames_received, 0);
        assert!(handle(&factory, "eth1").is_closed());
    }

    #[test]
    fn test_idle_backoff_is_short() {
        assert!(EngineConfig::default().idle_tick <= Duration::from_millis(1));
    }

    #[test]
    fn test_unknown_names() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.set_policy("nope", Policy::Mirror),
            Err(EngineError::UnknownInterface(_))
        ));
        assert!(matches!(
            engine.add_group_member("nope", "eth1", Role::Source),
            Err(EngineError::UnknownGroup(_))
        ));
    }
}
