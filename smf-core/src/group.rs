//! Interface Groups
//!
//! A group is a named set of interfaces sharing one forwarding mode and one
//! relay-algorithm identifier. The topology builds the associate graph for
//! its members.

use crate::interface::InterfaceId;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Arena handle of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Unrecognized mode or relay-type token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} token: {token}")]
pub struct TokenError {
    kind: &'static str,
    token: String,
}

/// Group forwarding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// One source relays to every other member
    Push,
    /// Full mesh among members
    Merge,
    /// Full mesh, relay decisions delegated to the relay algorithm
    Relay,
}

impl Mode {
    /// Configuration token for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Push => "push",
            Mode::Merge => "merge",
            Mode::Relay => "relay",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Mode::Push),
            "merge" => Ok(Mode::Merge),
            "relay" => Ok(Mode::Relay),
            _ => Err(TokenError {
                kind: "mode",
                token: s.to_string(),
            }),
        }
    }
}

/// Relay algorithm identifier
///
/// Opaque to the forwarding core; recorded for the relay decision function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayType {
    /// Classical flooding
    #[default]
    Cf,
    /// Source-specific multipoint relay
    SMpr,
    /// Non-source-specific multipoint relay
    NsMpr,
    /// MPR connected dominating set
    MprCds,
    /// Essential connected dominating set
    ECds,
}

impl RelayType {
    /// Configuration token for this relay type
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayType::Cf => "cf",
            RelayType::SMpr => "s-mpr",
            RelayType::NsMpr => "ns-mpr",
            RelayType::MprCds => "mpr-cds",
            RelayType::ECds => "e-cds",
        }
    }
}

impl fmt::Display for RelayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cf" => Ok(RelayType::Cf),
            "s-mpr" | "smpr" => Ok(RelayType::SMpr),
            "ns-mpr" | "nsmpr" => Ok(RelayType::NsMpr),
            "mpr-cds" | "mprcds" => Ok(RelayType::MprCds),
            "e-cds" | "ecds" => Ok(RelayType::ECds),
            _ => Err(TokenError {
                kind: "relay type",
                token: s.to_string(),
            }),
        }
    }
}

/// Group policy flags consumed by the relay control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupPolicy {
    /// Elastic multicast enabled
    pub elastic: bool,
    /// Unicast frames are relayed through this group
    pub unicast: bool,
    /// Path metric (ETX) in use
    pub etx: bool,
}

/// Named set of interfaces sharing one forwarding mode
#[derive(Debug, Clone)]
pub struct InterfaceGroup {
    id: GroupId,
    name: String,
    mode: Mode,
    relay_type: RelayType,
    /// Resequence relayed frames
    pub resequence: bool,
    /// Suppress hop-count decrement on relayed frames
    pub tunnel: bool,
    /// Policy flags
    pub policy: GroupPolicy,
    template: bool,
    push_source: Option<InterfaceId>,
    members: BTreeSet<InterfaceId>,
    derived_from: Option<GroupId>,
}

impl InterfaceGroup {
    pub(crate) fn new(id: GroupId, name: &str, mode: Mode, relay_type: RelayType) -> Self {
        InterfaceGroup {
            id,
            name: name.to_string(),
            mode,
            relay_type,
            resequence: false,
            tunnel: false,
            policy: GroupPolicy::default(),
            template: false,
            push_source: None,
            members: BTreeSet::new(),
            derived_from: None,
        }
    }

    /// Create a concrete push group from a template
    pub(crate) fn instantiate(
        template: &InterfaceGroup,
        id: GroupId,
        name: &str,
        source: InterfaceId,
    ) -> Self {
        let mut members = template.members.clone();
        members.insert(source);
        InterfaceGroup {
            id,
            name: name.to_string(),
            mode: Mode::Push,
            relay_type: template.relay_type,
            resequence: template.resequence,
            tunnel: template.tunnel,
            policy: template.policy,
            template: false,
            push_source: Some(source),
            members,
            derived_from: Some(template.id),
        }
    }

    /// Get the group handle
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Get the group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the forwarding mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Only a push group can be a template or have a push source
    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode != Mode::Push {
            self.template = false;
            self.push_source = None;
        }
    }

    /// Get the relay algorithm identifier
    pub fn relay_type(&self) -> RelayType {
        self.relay_type
    }

    pub(crate) fn set_relay_type(&mut self, relay_type: RelayType) {
        self.relay_type = relay_type;
    }

    /// Whether this group is a blueprint for per-source push groups
    pub fn is_template(&self) -> bool {
        self.template
    }

    pub(crate) fn set_template(&mut self, template: bool) {
        self.template = template;
        if template {
            self.push_source = None;
        }
    }

    /// Template this group was instantiated from
    pub fn derived_from(&self) -> Option<GroupId> {
        self.derived_from
    }

    /// Source interface of a push group
    pub fn push_source(&self) -> Option<InterfaceId> {
        self.push_source
    }

    pub(crate) fn set_push_source(&mut self, source: Option<InterfaceId>) {
        self.push_source = source;
    }

    /// All members, including a push source
    pub fn members(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.members.iter().copied()
    }

    /// Members other than the push source
    pub fn destinations(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        let source = self.push_source;
        self.members.iter().copied().filter(move |m| Some(*m) != source)
    }

    /// Check membership
    pub fn contains(&self, iface: InterfaceId) -> bool {
        self.members.contains(&iface)
    }

    /// Number of members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn insert_member(&mut self, iface: InterfaceId) -> bool {
        self.members.insert(iface)
    }

    pub(crate) fn remove_member(&mut self, iface: InterfaceId) -> bool {
        if self.push_source == Some(iface) {
            self.push_source = None;
        }
        self.members.remove(&iface)
    }

    /// Ordered (source, target) pairs the association pass must create
    pub(crate) fn edges(&self) -> Vec<(InterfaceId, InterfaceId)> {
        match self.mode {
            Mode::Push => {
                if self.template {
                    return Vec::new();
                }
                match self.push_source {
                    Some(src) => self.destinations().map(|dst| (src, dst)).collect(),
                    None => Vec::new(),
                }
            }
            Mode::Merge | Mode::Relay => {
                let mut edges = Vec::with_capacity(self.members.len() * self.members.len());
                for &src in &self.members {
                    for &dst in &self.members {
                        if src != dst {
                            edges.push((src, dst));
                        }
                    }
                }
                edges
            }
        }
    }
}
