// Integration tests for component synchronization
//
// Nodes that can reach each other converge on one storage; nodes that split
// off keep a copy of what they knew; one-way links push without merging.

use relaynet_core::contact::{ContactRecord, DetectedBy};
use relaynet_core::relay::LinkTable;
use relaynet_core::testing::{FixedRelations, TestEntity};
use relaynet_core::{
    Delivery, EntityKind, ManualClock, Message, RelayConfig, RelayNetwork, RelayNode,
    RelayStorage, Vec3,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn network() -> RelayNetwork {
    network_with_clock().1
}

fn network_with_clock() -> (Arc<ManualClock>, RelayNetwork) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let clock = Arc::new(ManualClock::default());
    let net = RelayNetwork::new(
        RelayConfig::default(),
        clock.clone(),
        Arc::new(FixedRelations::new()),
    )
    .unwrap();
    (clock, net)
}

fn add_nodes(net: &RelayNetwork, links: &LinkTable, ids: &[i64]) -> Vec<Arc<RelayNode>> {
    ids.iter()
        .map(|&id| {
            net.add_node(TestEntity::block(id, 1).handle(), Box::new(links.clone()))
                .unwrap()
        })
        .collect()
}

fn observe(net: &RelayNetwork, storage: &Arc<RelayStorage>, grid_id: i64) {
    observe_grid(net, storage, &TestEntity::grid(grid_id, 2));
}

fn observe_grid(net: &RelayNetwork, storage: &Arc<RelayStorage>, grid: &TestEntity) {
    storage.receive_contact(ContactRecord::observe(
        &grid.handle(),
        net.context().now(),
        DetectedBy::BY_RADAR,
    ));
}

fn grid_ids(storage: &RelayStorage) -> BTreeSet<i64> {
    storage
        .contacts()
        .iter()
        .filter(|c| c.kind() == EntityKind::Grid)
        .map(|c| c.entity_id())
        .collect()
}

#[test]
fn test_ring_converges_to_one_storage() {
    let net = network();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2, 3]);
    links.connect(1, 2);
    links.connect(2, 3);
    links.connect(3, 1);

    net.tick();

    assert_eq!(net.component_count(), 1);
    let shared = nodes[0].storage().unwrap();
    for node in &nodes {
        assert!(Arc::ptr_eq(&node.storage().unwrap(), &shared));
    }
    for id in 1..=3 {
        assert!(shared.contact(id).is_some(), "missing self report of {}", id);
    }
    assert!(nodes[0].is_connected_to(2));
    assert!(nodes[0].is_connected_to(3));

    println!("✓ 3-node ring converges to one storage");
}

#[test]
fn test_split_preserves_content() {
    let net = network();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2, 3]);
    links.connect(1, 2);
    links.connect(2, 3);
    net.tick();
    assert_eq!(net.component_count(), 1);

    let shared = nodes[1].storage().unwrap();
    observe(&net, &shared, 100);
    let dest = TestEntity::block(50, 1);
    let source = TestEntity::block(99, 1);
    assert_eq!(
        shared.receive_message(Message::new(
            "held",
            dest.handle(),
            &source.handle(),
            None,
            net.context().now(),
        )),
        Delivery::Stored(1)
    );
    let size_before = shared.size();
    let messages_before = shared.message_count();
    let contacts_before: BTreeSet<i64> = shared.contacts().iter().map(|c| c.entity_id()).collect();
    assert_eq!(contacts_before, [1, 2, 3, 100].into_iter().collect());

    links.disconnect(2, 3);
    net.tick();

    assert_eq!(net.component_count(), 2);
    let left = nodes[0].storage().unwrap();
    let right = nodes[2].storage().unwrap();
    assert!(Arc::ptr_eq(&left, &nodes[1].storage().unwrap()));
    assert!(!Arc::ptr_eq(&left, &right));
    assert_eq!(right.primary_id(), 3);
    assert!(!nodes[2].is_connected_to(1));

    // Self reports only refresh records both sides already hold
    for side in [&left, &right] {
        assert_eq!(side.size(), size_before);
        assert_eq!(side.message_count(), messages_before);
        let ids: BTreeSet<i64> = side.contacts().iter().map(|c| c.entity_id()).collect();
        assert_eq!(ids, contacts_before);
    }

    println!("✓ Split component keeps a full copy of the shared storage");
}

#[test]
fn test_one_way_link_pushes_without_merging() {
    let net = network();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2]);
    links.connect_one_way(1, 2);

    net.tick();
    net.tick();

    assert_eq!(net.component_count(), 2);
    let sender = nodes[0].storage().unwrap();
    let receiver = nodes[1].storage().unwrap();
    assert_eq!(sender.push_count(2), 1);
    assert_eq!(nodes[0].one_way_connections(), vec![2]);

    observe(&net, &sender, 200);
    observe(&net, &receiver, 201);

    assert!(receiver.contact(200).is_some());
    assert!(receiver.contact(1).is_some());
    assert!(sender.contact(201).is_none());
    assert!(sender.contact(2).is_none());

    links.disconnect(1, 2);
    net.tick();
    assert_eq!(sender.push_count(2), 0);

    println!("✓ One-way link pushes data but keeps storages apart");
}

#[test]
fn test_merge_unions_records() {
    let (clock, net) = network_with_clock();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2]);
    net.tick();
    assert_eq!(net.component_count(), 2);

    let a = nodes[0].storage().unwrap();
    let b = nodes[1].storage().unwrap();
    let grids: Vec<TestEntity> = (100..106).map(|id| TestEntity::grid(id, 2)).collect();
    let grid = |id: i64| &grids[(id - 100) as usize];
    let early_position = Vec3::new(1.0, 0.0, 0.0);
    let late_position = Vec3::new(2.0, 0.0, 0.0);

    // First round: a sees 100..=103, b sees 104
    let early = net.context().now();
    for g in &grids {
        g.set_position(early_position);
    }
    for id in 100..104 {
        observe_grid(&net, &a, grid(id));
    }
    observe_grid(&net, &b, grid(104));

    // Later round, grids have moved: a sees 104 again, b sees 103 and 105
    clock.advance(Duration::from_secs(5));
    let late = net.context().now();
    for g in &grids {
        g.set_position(late_position);
    }
    observe_grid(&net, &a, grid(104));
    observe_grid(&net, &b, grid(103));
    observe_grid(&net, &b, grid(105));

    assert_eq!(grid_ids(&a).len(), 5);
    assert_eq!(grid_ids(&b).len(), 3);

    links.connect(1, 2);
    net.tick();

    assert_eq!(net.component_count(), 1);
    let merged = nodes[0].storage().unwrap();
    assert!(Arc::ptr_eq(&merged, &nodes[1].storage().unwrap()));
    assert_eq!(grid_ids(&merged), (100..106).collect());

    // Each overlapping id keeps the newer observation, whichever side held it
    for id in [103, 104] {
        let record = merged.contact(id).unwrap();
        assert_eq!(record.last_seen_at(), late, "contact {}", id);
        assert_eq!(record.last_known_position(), late_position, "contact {}", id);
    }
    let untouched = merged.contact(100).unwrap();
    assert_eq!(untouched.last_seen_at(), early);
    assert_eq!(untouched.last_known_position(), early_position);

    println!("✓ 5 + 3 records with 2 overlaps merge into 6, newer record wins");
}

#[test]
fn test_repeated_merge_is_stable() {
    let net = network();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2]);
    links.connect(1, 2);
    net.tick();

    let storage = nodes[0].storage().unwrap();
    observe(&net, &storage, 300);
    let before = storage.contact(300).unwrap();

    for _ in 0..5 {
        net.tick();
        observe(&net, &storage, 300);
    }

    assert!(Arc::ptr_eq(&storage, &nodes[1].storage().unwrap()));
    assert!(Arc::ptr_eq(&before, &storage.contact(300).unwrap()));
    assert_eq!(grid_ids(&storage).len(), 1);

    println!("✓ Re-merging identical data changes nothing");
}

#[test]
fn test_removed_node_leaves_component() {
    let net = network();
    let links = LinkTable::new();
    let nodes = add_nodes(&net, &links, &[1, 2, 3]);
    links.connect(1, 2);
    links.connect(2, 3);
    net.tick();
    assert_eq!(net.component_count(), 1);

    net.remove(2);
    net.tick();

    assert_eq!(net.registry().node_count(), 2);
    assert_eq!(net.component_count(), 2);
    assert!(nodes[0].direct_connections().is_empty());
    assert!(nodes[2].direct_connections().is_empty());

    println!("✓ Removing the bridge node splits the component");
}
