use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use smf_core::frame;
use smf_core::{InterfaceId, LinkInfo, Mode, RelayType, Role, Topology};

fn mesh_topology(members: u32) -> (Topology, smf_core::GroupId) {
    let mut topo = Topology::new();
    let (group, _) = topo.add_interface_group("mesh", Mode::Merge, RelayType::Cf);
    for i in 1..=members {
        topo.add_interface(InterfaceId(i), &format!("wlan{}", i));
        topo.add_group_member(group, InterfaceId(i), Role::Destination)
            .unwrap();
    }
    (topo, group)
}

fn bench_association_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("association_pass");

    for members in [4u32, 16, 64] {
        group.bench_with_input(BenchmarkId::new("build", members), &members, |b, &n| {
            b.iter(|| {
                let (mut topo, id) = mesh_topology(n);
                let report = topo.update_group_associations(id).unwrap();
                black_box(report);
            });
        });

        group.bench_with_input(BenchmarkId::new("idempotent", members), &members, |b, &n| {
            let (mut topo, id) = mesh_topology(n);
            topo.update_group_associations(id).unwrap();
            b.iter(|| {
                let report = topo.update_group_associations(black_box(id)).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

fn bench_wildcard_link_up(c: &mut Criterion) {
    c.bench_function("wildcard_link_up", |b| {
        b.iter(|| {
            let mut topo = Topology::new();
            let (push, _) = topo.add_interface_group("push", Mode::Push, RelayType::Cf);
            topo.add_interface_matcher(push, "ppp", Role::Source).unwrap();
            topo.add_interface_matcher(push, "wlan", Role::Destination).unwrap();
            for i in 0..8u32 {
                topo.match_interface(&LinkInfo::new(format!("wlan{}", i), 100 + i, true));
            }
            for i in 0..8u32 {
                topo.match_interface(&LinkInfo::new(format!("ppp{}", i), 200 + i, true));
            }
            black_box(topo.associate_count());
        });
    });
}

fn bench_frame_classify(c: &mut Criterion) {
    let mut packet = vec![0x01, 0x00, 0x5e, 0, 0, 1, 0x02, 0, 0, 0, 0, 1, 0x08, 0x00];
    packet.extend_from_slice(&[0x45, 0, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0]);
    packet.extend_from_slice(&[10, 0, 0, 1, 224, 0, 0, 1]);
    packet.extend_from_slice(&[0x13, 0x88, 0x02, 0xba, 0, 8, 0, 0]);

    c.bench_function("frame_is_control", |b| {
        b.iter(|| black_box(frame::is_control(black_box(&packet))));
    });
}

criterion_group!(
    benches,
    bench_association_pass,
    bench_wildcard_link_up,
    bench_frame_classify
);
criterion_main!(benches);
