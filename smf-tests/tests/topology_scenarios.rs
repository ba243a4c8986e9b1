//! Interface group and associate graph scenarios
//!
//! Covers the three group modes, wildcard binding of links as they appear,
//! configuration and topology conflicts, and teardown.

use smf_core::*;

/// Helper to register named interfaces with consecutive indices
fn interfaces(topology: &mut Topology, names: &[&str]) -> Vec<InterfaceId> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let id = InterfaceId(i as u32 + 1);
            topology.add_interface(id, name);
            id
        })
        .collect()
}

fn edges(topology: &Topology) -> Vec<(InterfaceId, InterfaceId)> {
    let mut edges: Vec<_> = topology
        .interfaces()
        .flat_map(|i| i.associate_targets().map(move |t| (i.id(), t)))
        .collect();
    edges.sort();
    edges
}

// ============================================================================
// GROUP MODES
// ============================================================================

#[test]
fn test_relay_group_full_mesh() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["a", "b", "c"]);
    let (group, registration) = topology.add_interface_group("relay", Mode::Relay, RelayType::Cf);
    assert_eq!(registration, Registration::Created);

    for &id in &ids {
        topology.add_group_member(group, id, Role::Source).unwrap();
    }
    let report = topology.update_group_associations(group).unwrap();

    assert_eq!(report.created, 6);
    assert_eq!(topology.associate_count(), 6);
    for &id in &ids {
        let iface = topology.find_interface(id).unwrap();
        assert!(iface.find_associate(id).is_none());
        assert_eq!(iface.associates().len(), 2);
        assert!(iface.capture_active());
    }
}

#[test]
fn test_push_group_fans_out_from_source() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["src", "d1", "d2"]);
    let (group, _) = topology.add_interface_group("push", Mode::Push, RelayType::Cf);

    topology.add_group_member(group, ids[0], Role::Source).unwrap();
    topology.add_group_member(group, ids[1], Role::Destination).unwrap();
    topology.add_group_member(group, ids[2], Role::Destination).unwrap();
    topology.update_group_associations(group).unwrap();

    assert_eq!(edges(&topology), vec![(ids[0], ids[1]), (ids[0], ids[2])]);
}

#[test]
fn test_merge_group_pairs() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["a", "b"]);
    let (group, _) = topology.add_interface_group("merge", Mode::Merge, RelayType::Cf);
    for &id in &ids {
        topology.add_group_member(group, id, Role::Destination).unwrap();
    }
    topology.update_group_associations(group).unwrap();

    assert_eq!(edges(&topology), vec![(ids[0], ids[1]), (ids[1], ids[0])]);
}

#[test]
fn test_association_pass_idempotent() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["src", "dst"]);
    let (group, _) = topology.add_interface_group("push", Mode::Push, RelayType::Cf);
    topology.add_group_member(group, ids[0], Role::Source).unwrap();
    topology.add_group_member(group, ids[1], Role::Destination).unwrap();

    let first = topology.update_group_associations(group).unwrap();
    let second = topology.update_group_associations(group).unwrap();

    assert_eq!(first.created, 1);
    assert_eq!(second.created, 0);
    assert_eq!(second.existing, 1);
    assert_eq!(topology.associate_count(), 1);
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[test]
fn test_reregistration_reconfigures() {
    let mut topology = Topology::new();
    let (first, _) = topology.add_interface_group("g", Mode::Push, RelayType::Cf);
    let (same, registration) = topology.add_interface_group("g", Mode::Push, RelayType::Cf);
    assert_eq!(first, same);
    assert_eq!(registration, Registration::Existing);

    let (again, registration) = topology.add_interface_group("g", Mode::Relay, RelayType::ECds);
    assert_eq!(again, first);
    assert_eq!(registration, Registration::Reconfigured);
    let group = topology.find_group(first).unwrap();
    assert_eq!(group.mode(), Mode::Relay);
    assert_eq!(group.relay_type(), RelayType::ECds);
}

#[test]
fn test_edge_owned_by_other_group_conflicts() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["a", "b", "c"]);

    let (first, _) = topology.add_interface_group("one", Mode::Merge, RelayType::Cf);
    topology.add_group_member(first, ids[0], Role::Source).unwrap();
    topology.add_group_member(first, ids[1], Role::Source).unwrap();
    topology.update_group_associations(first).unwrap();

    let (second, _) = topology.add_interface_group("two", Mode::Push, RelayType::Cf);
    topology.add_group_member(second, ids[0], Role::Source).unwrap();
    topology.add_group_member(second, ids[1], Role::Destination).unwrap();
    topology.add_group_member(second, ids[2], Role::Destination).unwrap();

    match topology.update_group_associations(second) {
        Err(TopologyError::TopologyConflict {
            ingress,
            egress,
            existing,
            conflicts,
        }) => {
            assert_eq!((ingress, egress), (ids[0], ids[1]));
            assert_eq!(existing, first);
            assert_eq!(conflicts, 1);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    // the non-conflicting edge was still built
    let a = topology.find_interface(ids[0]).unwrap();
    assert_eq!(a.find_associate(ids[2]).map(|x| x.group), Some(second));
    assert_eq!(a.find_associate(ids[1]).map(|x| x.group), Some(first));
}

#[test]
fn test_link_up_conflict_skips_only_that_matcher() {
    let mut topology = Topology::new();
    let wlan0 = InterfaceId(1);
    let ppp0 = InterfaceId(10);
    let eth9 = InterfaceId(30);
    topology.add_interface(wlan0, "wlan0");
    topology.add_interface(ppp0, "ppp0");
    topology.add_interface(eth9, "eth9");

    let (mesh, _) = topology.add_interface_group("mesh", Mode::Merge, RelayType::Cf);
    topology.add_group_member(mesh, wlan0, Role::Destination).unwrap();
    topology.add_group_member(mesh, ppp0, Role::Destination).unwrap();
    topology.update_group_associations(mesh).unwrap();

    let (push, _) = topology.add_interface_group("push", Mode::Push, RelayType::Cf);
    topology.add_group_member(push, wlan0, Role::Destination).unwrap();
    topology.add_interface_matcher(push, "ppp", Role::Source).unwrap();

    let (flood, _) = topology.add_interface_group("flood", Mode::Merge, RelayType::Cf);
    topology.add_group_member(flood, eth9, Role::Destination).unwrap();
    topology.add_interface_matcher(flood, "ppp", Role::Destination).unwrap();

    // ppp0 -> wlan0 already belongs to mesh, so push:ppp0 gets no edge
    let touched = topology.match_interface(&LinkInfo::new("ppp0", 10, true));
    assert!(touched.contains(&flood));
    let ppp = topology.find_interface(ppp0).unwrap();
    assert_eq!(ppp.find_associate(wlan0).unwrap().group, mesh);
    assert_eq!(ppp.find_associate(eth9).unwrap().group, flood);

    // a later link on the same matcher binds normally
    topology.match_interface(&LinkInfo::new("ppp1", 11, true));
    let instance = topology.find_group_by_name("push:ppp1").unwrap();
    let ppp1 = topology.find_interface(InterfaceId(11)).unwrap();
    assert_eq!(ppp1.find_associate(wlan0).unwrap().group, instance.id());
    assert_eq!(ppp1.find_associate(eth9).unwrap().group, flood);
}

#[test]
fn test_scan_conflict_binds_remaining_links() {
    let mut topology = Topology::new();
    let wlan0 = InterfaceId(1);
    topology.add_interface(wlan0, "wlan0");
    topology.add_interface(InterfaceId(10), "ppp0");
    let (mesh, _) = topology.add_interface_group("mesh", Mode::Relay, RelayType::Cf);
    topology.add_group_member(mesh, wlan0, Role::Destination).unwrap();
    topology.add_group_member(mesh, InterfaceId(10), Role::Destination).unwrap();
    topology.update_group_associations(mesh).unwrap();

    let (push, _) = topology.add_interface_group("push", Mode::Push, RelayType::Cf);
    topology.add_group_member(push, wlan0, Role::Destination).unwrap();
    let matcher = topology.add_interface_matcher(push, "ppp", Role::Source).unwrap();

    let links = [
        LinkInfo::new("ppp0", 10, true),
        LinkInfo::new("ppp1", 11, true),
        LinkInfo::new("ppp2", 12, true),
    ];
    assert!(matches!(
        topology.match_existing_interfaces(&matcher, &links),
        Err(TopologyError::TopologyConflict { existing, .. }) if existing == mesh
    ));

    for (name, index) in [("push:ppp1", 11), ("push:ppp2", 12)] {
        let instance = topology.find_group_by_name(name).unwrap();
        assert_eq!(instance.push_source(), Some(InterfaceId(index)));
        let source = topology.find_interface(InterfaceId(index)).unwrap();
        assert_eq!(source.find_associate(wlan0).unwrap().group, instance.id());
    }
}

#[test]
fn test_unknown_references() {
    let mut topology = Topology::new();
    let (group, _) = topology.add_interface_group("g", Mode::Merge, RelayType::Cf);
    assert!(matches!(
        topology.add_group_member(group, InterfaceId(42), Role::Source),
        Err(TopologyError::UnknownInterface(_))
    ));
    assert!(matches!(
        topology.update_group_associations(GroupId(99)),
        Err(TopologyError::UnknownGroup(_))
    ));
}

// ============================================================================
// WILDCARD BINDING
// ============================================================================

#[test]
fn test_wildcard_source_instantiates_per_link() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["wlan0"]);
    let (template, _) = topology.add_interface_group("ppp", Mode::Push, RelayType::Cf);
    topology.add_interface_matcher(template, "ppp", Role::Source).unwrap();
    topology.add_group_member(template, ids[0], Role::Destination).unwrap();
    assert!(topology.find_group(template).unwrap().is_template());

    let touched = topology.match_interface(&LinkInfo::new("ppp0", 10, true));
    assert_eq!(touched.len(), 1);
    let instance = topology.find_group_by_name("ppp:ppp0").unwrap();
    assert_eq!(instance.push_source(), Some(InterfaceId(10)));
    assert_eq!(instance.derived_from(), Some(template));

    topology.match_interface(&LinkInfo::new("ppp1", 11, true));
    assert_eq!(topology.groups_sharing_name("ppp").len(), 3);

    let ppp0 = topology.find_interface(InterfaceId(10)).unwrap();
    assert!(ppp0.find_associate(ids[0]).is_some());
    assert_eq!(topology.associate_count(), 2);
}

#[test]
fn test_wildcard_destination_joins_group() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["src"]);
    let (group, _) = topology.add_interface_group("push", Mode::Push, RelayType::Cf);
    topology.add_group_member(group, ids[0], Role::Source).unwrap();
    let matcher = topology.add_interface_matcher(group, "eth", Role::Destination).unwrap();

    let links = vec![
        LinkInfo::new("eth0", 20, true),
        LinkInfo::new("eth1", 21, false),
        LinkInfo::new("wlan0", 22, true),
    ];
    assert_eq!(topology.match_existing_interfaces(&matcher, &links).unwrap(), 1);

    let src = topology.find_interface(ids[0]).unwrap();
    assert!(src.find_associate(InterfaceId(20)).is_some());
    assert!(topology.find_interface(InterfaceId(21)).is_none());
}

#[test]
fn test_down_link_ignored() {
    let mut topology = Topology::new();
    let (group, _) = topology.add_interface_group("ppp", Mode::Push, RelayType::Cf);
    topology.add_interface_matcher(group, "ppp", Role::Source).unwrap();

    assert!(topology.match_interface(&LinkInfo::new("ppp0", 10, false)).is_empty());
    assert_eq!(topology.interface_count(), 0);
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[test]
fn test_link_down_removes_instance_and_edges() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["wlan0"]);
    let (template, _) = topology.add_interface_group("ppp", Mode::Push, RelayType::Cf);
    topology.add_interface_matcher(template, "ppp", Role::Source).unwrap();
    topology.add_group_member(template, ids[0], Role::Destination).unwrap();
    topology.match_interface(&LinkInfo::new("ppp0", 10, true));

    assert!(topology.remove_interface(InterfaceId(10)).is_some());
    assert!(topology.find_group_by_name("ppp:ppp0").is_none());
    assert!(topology.find_group(template).is_some());
    assert_eq!(topology.associate_count(), 0);
}

#[test]
fn test_remove_group_retracts_and_destroys() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["a", "b", "c"]);
    let (mesh, _) = topology.add_interface_group("mesh", Mode::Merge, RelayType::Cf);
    let (other, _) = topology.add_interface_group("other", Mode::Merge, RelayType::Cf);
    for &id in &ids {
        topology.add_group_member(mesh, id, Role::Source).unwrap();
    }
    topology.add_group_member(other, ids[2], Role::Source).unwrap();
    topology.update_group_associations(mesh).unwrap();

    let destroyed = topology.remove_interface_group(mesh).unwrap();
    assert_eq!(destroyed, vec![ids[0], ids[1]]);
    assert_eq!(topology.associate_count(), 0);
    assert!(topology.find_interface(ids[2]).is_some());
}

#[test]
fn test_member_removal_keeps_edges() {
    let mut topology = Topology::new();
    let ids = interfaces(&mut topology, &["a", "b", "c"]);
    let (mesh, _) = topology.add_interface_group("mesh", Mode::Merge, RelayType::Cf);
    let (other, _) = topology.add_interface_group("other", Mode::Merge, RelayType::Cf);
    for &id in &ids {
        topology.add_group_member(mesh, id, Role::Source).unwrap();
    }
    topology.add_group_member(other, ids[0], Role::Source).unwrap();
    topology.update_group_associations(mesh).unwrap();

    assert!(!topology.remove_group_member(mesh, ids[0]).unwrap());
    let a = topology.find_interface(ids[0]).unwrap();
    assert_eq!(a.associates().len(), 2);
}
