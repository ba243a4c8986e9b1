//! Forwarding Topology
//!
//! Index-addressed arena holding interfaces, groups and wildcard matchers.
//! Associates are stored as `(group, target)` value pairs inside their
//! source interface, so the graph never holds references between arena
//! entries.
//!
//! The association pass is additive and idempotent: it creates missing
//! edges and never retracts existing ones. Edges are retracted only when
//! their owning group is removed or their target interface is destroyed.

use crate::group::{GroupId, InterfaceGroup, Mode, RelayType};
use crate::interface::{AssociateInsert, Interface, InterfaceId};
use crate::matcher::{InterfaceMatcher, LinkInfo, MatcherInsert, MatcherTable, Role};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Separator between a template name and a source interface name
pub const INSTANCE_SEPARATOR: char = ':';

/// Topology errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Unknown interface: {0}")]
    UnknownInterface(InterfaceId),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Associate {ingress}->{egress} already owned by {existing} ({conflicts} conflicting edge(s))")]
    TopologyConflict {
        ingress: InterfaceId,
        egress: InterfaceId,
        existing: GroupId,
        conflicts: usize,
    },

    #[error("Group {0} is not a push group")]
    NotPushGroup(String),
}

/// Outcome of registering a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New group created
    Created,
    /// Group existed with identical attributes
    Existing,
    /// Group existed with a different mode or relay type; overwritten
    Reconfigured,
}

/// Outcome of one association pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationReport {
    /// Edges created by this pass
    pub created: usize,
    /// Edges already present under the same group
    pub existing: usize,
}

/// Interface and group arena
#[derive(Debug, Default)]
pub struct Topology {
    interfaces: HashMap<InterfaceId, Interface>,
    names: HashMap<String, InterfaceId>,
    groups: HashMap<GroupId, InterfaceGroup>,
    group_names: BTreeMap<String, GroupId>,
    matchers: MatcherTable,
    next_group: u32,
}

impl Topology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Interfaces
    // ------------------------------------------------------------------

    /// Find or create the interface with this index
    pub fn add_interface(&mut self, id: InterfaceId, name: &str) -> &mut Interface {
        if let Some(previous) = self.names.get(name).copied() {
            if previous != id && !self.interfaces.contains_key(&id) {
                tracing::debug!(name, old = %previous, new = %id, "interface index changed");
                self.names.remove(name);
            }
        }

        let names = &mut self.names;
        let iface = self.interfaces.entry(id).or_insert_with(|| {
            tracing::debug!(name, %id, "interface created");
            Interface::new(id, name)
        });

        if iface.name() != name {
            names.remove(iface.name());
            iface.set_name(name);
        }
        names.insert(name.to_string(), id);
        iface
    }

    /// Find an interface by index
    pub fn find_interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(&id)
    }

    /// Find an interface by index for modification
    pub fn find_interface_mut(&mut self, id: InterfaceId) -> Option<&mut Interface> {
        self.interfaces.get_mut(&id)
    }

    /// Find an interface by name
    pub fn find_interface_by_name(&self, name: &str) -> Option<&Interface> {
        self.names.get(name).and_then(|id| self.interfaces.get(id))
    }

    /// Iterate over all interfaces in index order
    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        let mut ids: Vec<_> = self.interfaces.keys().copied().collect();
        ids.sort();
        ids.into_iter().filter_map(move |id| self.interfaces.get(&id))
    }

    /// Number of interfaces
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Total number of associates across all interfaces
    pub fn associate_count(&self) -> usize {
        self.interfaces.values().map(|i| i.associates().len()).sum()
    }

    /// Destroy an interface
    ///
    /// Removes it from every group, purges associates that target it and
    /// removes groups instantiated from a template with it as source.
    pub fn remove_interface(&mut self, id: InterfaceId) -> Option<Interface> {
        let iface = self.interfaces.remove(&id)?;
        self.names.remove(iface.name());

        let derived: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.derived_from().is_some() && g.push_source() == Some(id))
            .map(|g| g.id())
            .collect();
        for group in derived {
            self.drop_group(group);
        }

        for group in self.groups.values_mut() {
            group.remove_member(id);
        }
        for other in self.interfaces.values_mut() {
            other.remove_associates_to(id);
        }

        tracing::debug!(name = iface.name(), %id, "interface destroyed");
        Some(iface)
    }

    /// Groups the interface belongs to
    pub fn groups_of(&self, id: InterfaceId) -> Vec<GroupId> {
        let mut found: Vec<_> = self
            .groups
            .values()
            .filter(|g| g.contains(id))
            .map(|g| g.id())
            .collect();
        found.sort();
        found
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Register a group, or re-register an existing one
    ///
    /// Re-registering with a different mode or relay type is a
    /// configuration conflict: it is logged, the new attributes win and the
    /// group (with its members) is retained.
    pub fn add_interface_group(
        &mut self,
        name: &str,
        mode: Mode,
        relay_type: RelayType,
    ) -> (GroupId, Registration) {
        if let Some(&id) = self.group_names.get(name) {
            if let Some(group) = self.groups.get_mut(&id) {
                if group.mode() == mode && group.relay_type() == relay_type {
                    return (id, Registration::Existing);
                }
                tracing::warn!(
                    group = name,
                    old_mode = %group.mode(),
                    new_mode = %mode,
                    old_relay = %group.relay_type(),
                    new_relay = %relay_type,
                    "group re-registered with different attributes"
                );
                group.set_mode(mode);
                group.set_relay_type(relay_type);
                return (id, Registration::Reconfigured);
            }
        }

        let id = self.allocate_group_id();
        self.groups
            .insert(id, InterfaceGroup::new(id, name, mode, relay_type));
        self.group_names.insert(name.to_string(), id);
        (id, Registration::Created)
    }

    fn allocate_group_id(&mut self) -> GroupId {
        self.next_group += 1;
        GroupId(self.next_group)
    }

    /// Find a group by handle
    pub fn find_group(&self, id: GroupId) -> Option<&InterfaceGroup> {
        self.groups.get(&id)
    }

    /// Find a group by handle for modification
    pub fn find_group_mut(&mut self, id: GroupId) -> Option<&mut InterfaceGroup> {
        self.groups.get_mut(&id)
    }

    /// Find a group by name
    pub fn find_group_by_name(&self, name: &str) -> Option<&InterfaceGroup> {
        self.group_names.get(name).and_then(|id| self.groups.get(id))
    }

    /// Iterate over groups in name order
    pub fn groups(&self) -> impl Iterator<Item = &InterfaceGroup> {
        self.group_names
            .values()
            .filter_map(move |id| self.groups.get(id))
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Groups named `base` or instantiated from it (`base:<iface>`)
    pub fn groups_sharing_name(&self, base: &str) -> Vec<GroupId> {
        self.group_names
            .range(base.to_string()..)
            .take_while(|(name, _)| name.starts_with(base))
            .filter(|(name, _)| {
                let rest = &name[base.len()..];
                rest.is_empty() || rest.starts_with(INSTANCE_SEPARATOR)
            })
            .map(|(_, id)| *id)
            .collect()
    }

    /// Explicitly remove a group
    ///
    /// Retracts its associates, destroys its matchers and destroys the
    /// interfaces left in no group. Returns the destroyed interfaces.
    pub fn remove_interface_group(&mut self, id: GroupId) -> Result<Vec<InterfaceId>, TopologyError> {
        let group = self
            .groups
            .get(&id)
            .ok_or_else(|| TopologyError::UnknownGroup(id.to_string()))?;
        let name = group.name().to_string();
        let members: Vec<_> = group.members().collect();

        let removed = self.matchers.remove_group(&name);
        if removed > 0 {
            tracing::debug!(group = %name, removed, "matchers removed");
        }
        self.drop_group(id);

        let mut destroyed = Vec::new();
        for member in members {
            if self.groups_of(member).is_empty() && self.remove_interface(member).is_some() {
                destroyed.push(member);
            }
        }
        tracing::info!(group = %name, destroyed = destroyed.len(), "group removed");
        Ok(destroyed)
    }

    fn drop_group(&mut self, id: GroupId) {
        if let Some(group) = self.groups.remove(&id) {
            self.group_names.remove(group.name());
            for iface in self.interfaces.values_mut() {
                iface.remove_group_associates(id);
            }
        }
    }

    /// Add an interface to a group
    ///
    /// In a push group, `Role::Source` sets the push source. Mesh groups
    /// ignore the role. Replacing an existing push source is logged.
    pub fn add_group_member(
        &mut self,
        group: GroupId,
        iface: InterfaceId,
        role: Role,
    ) -> Result<(), TopologyError> {
        if !self.interfaces.contains_key(&iface) {
            return Err(TopologyError::UnknownInterface(iface));
        }
        let group = self
            .groups
            .get_mut(&group)
            .ok_or_else(|| TopologyError::UnknownGroup(group.to_string()))?;

        group.insert_member(iface);
        if role == Role::Source && group.mode() == Mode::Push {
            if let Some(previous) = group.push_source() {
                if previous != iface {
                    tracing::warn!(
                        group = group.name(),
                        old = %previous,
                        new = %iface,
                        "push source replaced"
                    );
                }
            }
            if group.is_template() {
                tracing::warn!(group = group.name(), "concrete source given to template group");
                group.set_template(false);
            }
            group.set_push_source(Some(iface));
        }
        Ok(())
    }

    /// Remove an interface from a group
    ///
    /// Associates built for the member are left in place. When the
    /// interface belongs to no other group it is destroyed; returns whether
    /// that happened.
    pub fn remove_group_member(
        &mut self,
        group: GroupId,
        iface: InterfaceId,
    ) -> Result<bool, TopologyError> {
        let entry = self
            .groups
            .get_mut(&group)
            .ok_or_else(|| TopologyError::UnknownGroup(group.to_string()))?;
        if !entry.remove_member(iface) {
            return Err(TopologyError::UnknownInterface(iface));
        }

        if self.groups_of(iface).is_empty() {
            self.remove_interface(iface);
            return Ok(true);
        }
        Ok(false)
    }

    /// Build the associate graph of a group
    ///
    /// Push groups link the source to every other member, mesh groups link
    /// every ordered member pair. A push group without a resolved source is
    /// a no-op. Edges that already exist under another group are conflicts:
    /// they are skipped, the rest of the pass proceeds, and the call reports
    /// the first conflict.
    pub fn update_group_associations(
        &mut self,
        id: GroupId,
    ) -> Result<AssociationReport, TopologyError> {
        let group = self
            .groups
            .get(&id)
            .ok_or_else(|| TopologyError::UnknownGroup(id.to_string()))?;
        let edges = group.edges();
        let members: Vec<_> = group.members().collect();
        let name = group.name().to_string();

        let mut report = AssociationReport::default();
        let mut first_conflict = None;
        let mut conflicts = 0;

        for (src, dst) in edges {
            if !self.interfaces.contains_key(&dst) {
                continue;
            }
            let Some(source) = self.interfaces.get_mut(&src) else {
                continue;
            };
            match source.add_associate(id, dst) {
                AssociateInsert::Created => report.created += 1,
                AssociateInsert::Existing => report.existing += 1,
                AssociateInsert::Conflict { existing } => {
                    tracing::warn!(
                        group = %name,
                        source = %src,
                        target = %dst,
                        owner = %existing,
                        "associate owned by another group"
                    );
                    conflicts += 1;
                    first_conflict.get_or_insert((src, dst, existing));
                }
            }
        }

        self.update_capture_state(&members);

        tracing::debug!(
            group = %name,
            created = report.created,
            existing = report.existing,
            conflicts,
            "association pass"
        );

        match first_conflict {
            Some((ingress, egress, existing)) => Err(TopologyError::TopologyConflict {
                ingress,
                egress,
                existing,
                conflicts,
            }),
            None => Ok(report),
        }
    }

    /// Open the capture path of every member that relays traffic; close it
    /// on egress-only members under an output-diversion policy.
    fn update_capture_state(&mut self, members: &[InterfaceId]) {
        for id in members {
            if let Some(iface) = self.interfaces.get_mut(id) {
                let relays = !iface.associates().is_empty();
                let active = relays || !iface.flags().divert_output;
                if iface.capture_active() != active {
                    tracing::debug!(iface = iface.name(), active, "capture state changed");
                }
                iface.set_capture_active(active);
            }
        }
    }

    // ------------------------------------------------------------------
    // Wildcard matchers
    // ------------------------------------------------------------------

    /// Registered matchers
    pub fn matchers(&self) -> &MatcherTable {
        &self.matchers
    }

    /// Register a wildcard prefix against a group
    ///
    /// A source matcher turns its push group into a template.
    pub fn add_interface_matcher(
        &mut self,
        group: GroupId,
        prefix: &str,
        role: Role,
    ) -> Result<InterfaceMatcher, TopologyError> {
        let entry = self
            .groups
            .get_mut(&group)
            .ok_or_else(|| TopologyError::UnknownGroup(group.to_string()))?;

        if role == Role::Source && entry.mode() == Mode::Push {
            entry.set_template(true);
        }

        let matcher = InterfaceMatcher::new(prefix, entry.name(), role, entry.mode(), entry.relay_type());
        if self.matchers.insert(matcher.clone()) == MatcherInsert::Updated {
            tracing::debug!(prefix, group = matcher.group(), "matcher updated");
        }
        Ok(matcher)
    }

    /// Resolve one matcher against the currently known links
    ///
    /// Returns the number of links bound. A link that fails to resolve is
    /// logged and skipped; the first such error is returned once every
    /// other link has been bound.
    pub fn match_existing_interfaces(
        &mut self,
        matcher: &InterfaceMatcher,
        links: &[LinkInfo],
    ) -> Result<usize, TopologyError> {
        let mut bound = 0;
        let mut first_error = None;
        for link in links.iter().filter(|l| l.up && matcher.matches(&l.name)) {
            match self.resolve(matcher, link) {
                Ok(_) => bound += 1,
                Err(e) => {
                    tracing::warn!(iface = %link.name, prefix = matcher.prefix(), "{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(bound),
        }
    }

    /// Resolve every matcher whose prefix matches a link that came up
    ///
    /// Returns the groups whose membership changed. Topology conflicts are
    /// logged and resolution continues.
    pub fn match_interface(&mut self, link: &LinkInfo) -> Vec<GroupId> {
        if !link.up {
            return Vec::new();
        }
        let matchers: Vec<InterfaceMatcher> =
            self.matchers.matching(&link.name).into_iter().cloned().collect();

        let mut touched = Vec::new();
        for matcher in &matchers {
            match self.resolve(matcher, link) {
                Ok(groups) => touched.extend(groups),
                Err(e) => tracing::warn!(iface = %link.name, prefix = matcher.prefix(), "{}", e),
            }
        }
        touched.sort();
        touched.dedup();
        touched
    }

    fn resolve(
        &mut self,
        matcher: &InterfaceMatcher,
        link: &LinkInfo,
    ) -> Result<Vec<GroupId>, TopologyError> {
        let iface = InterfaceId(link.index);
        self.add_interface(iface, &link.name);

        let touched = match matcher.role() {
            Role::Source => vec![self.instantiate_push_group(matcher.group(), iface, &link.name)?],
            Role::Destination => {
                let groups = self.groups_sharing_name(matcher.group());
                if groups.is_empty() {
                    return Err(TopologyError::UnknownGroup(matcher.group().to_string()));
                }
                for &id in &groups {
                    if let Some(group) = self.groups.get_mut(&id) {
                        if group.push_source() != Some(iface) {
                            group.insert_member(iface);
                        }
                    }
                }
                groups
            }
        };

        let mut conflict = None;
        for &id in &touched {
            if let Err(e) = self.update_group_associations(id) {
                conflict.get_or_insert(e);
            }
        }
        if self.groups_of(iface).is_empty() {
            self.remove_interface(iface);
        }
        match conflict {
            Some(e) => Err(e),
            None => Ok(touched),
        }
    }

    fn instantiate_push_group(
        &mut self,
        template: &str,
        source: InterfaceId,
        source_name: &str,
    ) -> Result<GroupId, TopologyError> {
        let name = format!("{}{}{}", template, INSTANCE_SEPARATOR, source_name);
        if let Some(&id) = self.group_names.get(&name) {
            if let Some(group) = self.groups.get_mut(&id) {
                group.insert_member(source);
                group.set_push_source(Some(source));
            }
            return Ok(id);
        }

        let base_id = *self
            .group_names
            .get(template)
            .ok_or_else(|| TopologyError::UnknownGroup(template.to_string()))?;
        let id = GroupId(self.next_group + 1);
        let group = match self.groups.get(&base_id) {
            Some(base) if base.mode() == Mode::Push => {
                InterfaceGroup::instantiate(base, id, &name, source)
            }
            Some(_) => return Err(TopologyError::NotPushGroup(template.to_string())),
            None => return Err(TopologyError::UnknownGroup(template.to_string())),
        };
        self.next_group = id.0;
        tracing::info!(
            group = %name,
            destinations = group.member_count() - 1,
            "push group instantiated from template"
        );
        self.groups.insert(id, group);
        self.group_names.insert(name, id);
        Ok(id)
    }
}
