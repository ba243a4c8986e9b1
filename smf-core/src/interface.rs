//! Forwarding Interfaces
//!
//! An interface is a logical forwarding endpoint identified by the host's
//! stable link index. It carries its address set, flags, device binding and
//! the set of outgoing associates built by the group association pass.

use crate::group::GroupId;
use std::fmt;
use std::net::IpAddr;

/// Stable interface index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

impl InterfaceId {
    /// Get the raw index
    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if#{}", self.0)
    }
}

/// Interface flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceFlags {
    /// Link-layer delivery on this interface is reliable
    pub reliable: bool,
    /// Interface participates in layered (scoped) forwarding
    pub layered: bool,
    /// Frames relayed through this interface are resequenced
    pub resequence: bool,
    /// Interface is a tunnel endpoint
    pub tunnel: bool,
    /// Interface encapsulates outbound frames
    pub encapsulating: bool,
    /// Relay decisions on this interface consult the path metric
    pub uses_path_metric: bool,
    /// Do not relay IGMP frames received on this interface
    pub block_igmp: bool,
    /// Egress-only use of this interface may close its capture path
    pub divert_output: bool,
}

/// How an interface is backed by transport channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceBinding {
    /// A single physical device
    Physical(String),
    /// One logical interface over several physical channels
    Composite(Vec<String>),
    /// A software interface exposed to the host stack, optionally bound
    /// to physical channels
    Virtual {
        /// Software interface name
        vif: String,
        /// Bound physical devices
        devices: Vec<String>,
    },
}

impl DeviceBinding {
    /// Names of the physical devices behind this binding
    pub fn devices(&self) -> Vec<&str> {
        match self {
            DeviceBinding::Physical(dev) => vec![dev.as_str()],
            DeviceBinding::Composite(devs) => devs.iter().map(String::as_str).collect(),
            DeviceBinding::Virtual { devices, .. } => devices.iter().map(String::as_str).collect(),
        }
    }
}

/// Directed forwarding edge scoped to one interface group
///
/// Stored in the source interface: traffic relayed on the owning interface
/// may egress via `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Associate {
    /// Owning group
    pub group: GroupId,
    /// Egress interface
    pub target: InterfaceId,
}

/// Result of adding an associate to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssociateInsert {
    Created,
    Existing,
    Conflict { existing: GroupId },
}

/// A logical forwarding endpoint
#[derive(Debug, Clone)]
pub struct Interface {
    id: InterfaceId,
    name: String,
    addresses: Vec<IpAddr>,
    net_addr: Option<IpAddr>,
    flags: InterfaceFlags,
    binding: DeviceBinding,
    associates: Vec<Associate>,
    capture_active: bool,
}

impl Interface {
    /// Create an interface bound to the physical device of the same name
    pub fn new(id: InterfaceId, name: impl Into<String>) -> Self {
        let name = name.into();
        Interface {
            id,
            binding: DeviceBinding::Physical(name.clone()),
            name,
            addresses: Vec::new(),
            net_addr: None,
            flags: InterfaceFlags::default(),
            associates: Vec::new(),
            capture_active: false,
        }
    }

    /// Get the interface index
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    /// Get the interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Configured addresses
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Add an address, ignoring duplicates
    pub fn add_address(&mut self, addr: IpAddr) {
        if !self.addresses.contains(&addr) {
            self.addresses.push(addr);
        }
    }

    /// Resolved network address used as this node's identity on the link
    pub fn net_addr(&self) -> Option<IpAddr> {
        self.net_addr.or_else(|| self.addresses.first().copied())
    }

    /// Set the resolved network address
    pub fn set_net_addr(&mut self, addr: IpAddr) {
        self.net_addr = Some(addr);
    }

    /// Interface flags
    pub fn flags(&self) -> InterfaceFlags {
        self.flags
    }

    /// Mutable interface flags
    pub fn flags_mut(&mut self) -> &mut InterfaceFlags {
        &mut self.flags
    }

    /// Device binding
    pub fn binding(&self) -> &DeviceBinding {
        &self.binding
    }

    /// Replace the device binding
    pub fn set_binding(&mut self, binding: DeviceBinding) {
        self.binding = binding;
    }

    /// Outgoing associates
    pub fn associates(&self) -> &[Associate] {
        &self.associates
    }

    /// Find the associate towards `target`, if any
    pub fn find_associate(&self, target: InterfaceId) -> Option<&Associate> {
        self.associates.iter().find(|a| a.target == target)
    }

    /// Egress interfaces reachable from this one
    pub fn associate_targets(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.associates.iter().map(|a| a.target)
    }

    /// Whether the ingress capture path should be open
    pub fn capture_active(&self) -> bool {
        self.capture_active
    }

    pub(crate) fn set_capture_active(&mut self, active: bool) {
        self.capture_active = active;
    }

    pub(crate) fn add_associate(&mut self, group: GroupId, target: InterfaceId) -> AssociateInsert {
        match self.find_associate(target) {
            Some(existing) if existing.group == group => AssociateInsert::Existing,
            Some(existing) => AssociateInsert::Conflict {
                existing: existing.group,
            },
            None => {
                self.associates.push(Associate { group, target });
                AssociateInsert::Created
            }
        }
    }

    pub(crate) fn remove_group_associates(&mut self, group: GroupId) -> usize {
        let before = self.associates.len();
        self.associates.retain(|a| a.group != group);
        before - self.associates.len()
    }

    pub(crate) fn remove_associates_to(&mut self, target: InterfaceId) -> usize {
        let before = self.associates.len();
        self.associates.retain(|a| a.target != target);
        before - self.associates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_defaults() {
        let iface = Interface::new(InterfaceId(3), "wlan0");
        assert_eq!(iface.name(), "wlan0");
        assert_eq!(iface.binding(), &DeviceBinding::Physical("wlan0".to_string()));
        assert!(iface.associates().is_empty());
        assert!(!iface.capture_active());
        assert!(iface.net_addr().is_none());
    }

    #[test]
    fn test_net_addr_falls_back_to_first_address() {
        let mut iface = Interface::new(InterfaceId(1), "eth0");
        iface.add_address("10.0.0.1".parse().unwrap());
        iface.add_address("10.0.0.1".parse().unwrap());
        iface.add_address("fe80::1".parse().unwrap());

        assert_eq!(iface.addresses().len(), 2);
        assert_eq!(iface.net_addr(), Some("10.0.0.1".parse().unwrap()));

        iface.set_net_addr("fe80::1".parse().unwrap());
        assert_eq!(iface.net_addr(), Some("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_associate_uniqueness() {
        let mut iface = Interface::new(InterfaceId(1), "a");

        assert_eq!(iface.add_associate(GroupId(1), InterfaceId(2)), AssociateInsert::Created);
        assert_eq!(iface.add_associate(GroupId(1), InterfaceId(2)), AssociateInsert::Existing);
        assert_eq!(
            iface.add_associate(GroupId(7), InterfaceId(2)),
            AssociateInsert::Conflict { existing: GroupId(1) }
        );
        assert_eq!(iface.associates().len(), 1);
    }

    #[test]
    fn test_remove_associates() {
        let mut iface = Interface::new(InterfaceId(1), "a");
        iface.add_associate(GroupId(1), InterfaceId(2));
        iface.add_associate(GroupId(1), InterfaceId(3));
        iface.add_associate(GroupId(2), InterfaceId(4));

        assert_eq!(iface.remove_associates_to(InterfaceId(3)), 1);
        assert_eq!(iface.remove_group_associates(GroupId(1)), 1);
        assert_eq!(iface.associate_targets().collect::<Vec<_>>(), vec![InterfaceId(4)]);
    }

    #[test]
    fn test_composite_binding_devices() {
        let binding = DeviceBinding::Composite(vec!["wlan0".into(), "wlan1".into()]);
        assert_eq!(binding.devices(), vec!["wlan0", "wlan1"]);

        let vif = DeviceBinding::Virtual {
            vif: "smf0".into(),
            devices: vec!["eth0".into()],
        };
        assert_eq!(vif.devices(), vec!["eth0"]);
    }
}
