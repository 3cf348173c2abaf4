// Integration tests for snapshot persistence
//
// A network saved to a sled database and restored into a fresh network
// keeps its grid contacts and undelivered messages. Contacts for entities
// that have not loaded yet are retried for a while, then dropped.

use relaynet_core::contact::{ContactRecord, DetectedBy};
use relaynet_core::relay::client::collecting_handler;
use relaynet_core::relay::LinkTable;
use relaynet_core::testing::{FixedRelations, StaticDirectory, TestEntity};
use relaynet_core::{
    Delivery, ManualClock, Message, RelayConfig, RelayNetwork, SnapshotStore,
};
use std::sync::Arc;
use tempfile::tempdir;

struct World {
    alpha: TestEntity,
    beta: TestEntity,
    alpha_antenna: TestEntity,
    beta_antenna: TestEntity,
    receiver: TestEntity,
    enemy: TestEntity,
}

impl World {
    fn new() -> Self {
        let alpha = TestEntity::grid(10, 1).named("Alpha");
        let beta = TestEntity::grid(20, 1).named("Beta");
        Self {
            alpha_antenna: TestEntity::block(11, 1).attached_to(&alpha),
            beta_antenna: TestEntity::block(21, 1).attached_to(&beta),
            receiver: TestEntity::block(12, 1).named("Prog").attached_to(&alpha),
            enemy: TestEntity::grid(500, 2).named("Raider"),
            alpha,
            beta,
        }
    }

    /// Register the antennas of both ships, linked together
    fn populate(&self, net: &RelayNetwork) {
        let links = LinkTable::new();
        links.connect(11, 21);
        net.add_node(self.alpha_antenna.handle(), Box::new(links.clone()))
            .unwrap();
        net.add_node(self.beta_antenna.handle(), Box::new(links)).unwrap();
    }
}

fn network_with(config: RelayConfig) -> RelayNetwork {
    RelayNetwork::new(
        config,
        Arc::new(ManualClock::default()),
        Arc::new(FixedRelations::new()),
    )
    .unwrap()
}

/// Run a network with one enemy sighting and one undelivered message,
/// then save it.
fn save_world(world: &World, store: &SnapshotStore) {
    let net = network_with(RelayConfig::default());
    world.populate(&net);
    net.tick();

    let storage = net.storages().pop().unwrap();
    storage.receive_contact(ContactRecord::observe(
        &world.enemy.handle(),
        net.context().now(),
        DetectedBy::BY_RADAR,
    ));
    let message = Message::new(
        "rendezvous at dawn",
        world.receiver.handle(),
        &world.beta_antenna.handle(),
        None,
        net.context().now(),
    );
    assert_eq!(storage.receive_message(message), Delivery::Stored(1));

    assert_eq!(net.save(store).unwrap(), 1);
}

#[test]
fn test_restore_from_sled_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.db");
    let world = World::new();

    {
        let store = SnapshotStore::open(&path).unwrap();
        save_world(&world, &store);
    }

    let store = SnapshotStore::open(&path).unwrap();
    assert_eq!(store.list().unwrap(), vec![11]);
    let snapshot = store.get(11).unwrap().unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    let mut grids: Vec<_> = snapshot.last_seen.iter().map(|c| c.entity_id).collect();
    grids.sort_unstable();
    assert_eq!(grids, vec![10, 20, 500]);

    let directory = StaticDirectory::new();
    for entity in [&world.alpha, &world.beta, &world.enemy, &world.receiver] {
        directory.register(entity);
    }

    let net = network_with(RelayConfig::default());
    world.populate(&net);
    let report = net.restore(&store, Arc::new(directory)).unwrap();
    assert_eq!(report.storages, 1);
    assert_eq!(report.contacts, 3);
    assert_eq!(report.messages, 1);
    assert_eq!(report.pending, 0);

    net.tick();
    assert_eq!(net.component_count(), 1);
    let storage = net.storages().pop().unwrap();
    assert_eq!(storage.primary_id(), 11);
    assert!(storage.contact(500).is_some());

    let (handler, inbox) = collecting_handler();
    let client = net.add_client(world.receiver.handle(), Some(handler)).unwrap();
    client.storage(net.registry()).unwrap();

    let received = inbox.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content(), "rendezvous at dawn");
    assert_eq!(received[0].source_grid_name(), "Beta");

    println!("✓ Contacts and messages survive a save and restore");
}

#[test]
fn test_late_entity_restored_on_later_tick() {
    let world = World::new();
    let store = SnapshotStore::in_memory();
    save_world(&world, &store);

    let directory = StaticDirectory::new();
    for entity in [&world.alpha, &world.beta, &world.receiver] {
        directory.register(entity);
    }

    let net = network_with(RelayConfig::default());
    world.populate(&net);
    let report = net.restore(&store, Arc::new(directory.clone())).unwrap();
    assert_eq!(report.pending, 1);

    net.tick();
    assert_eq!(net.pending_restores(), 1);

    directory.register(&world.enemy);
    net.tick();
    assert_eq!(net.pending_restores(), 0);
    assert!(net.storages()[0].contact(500).is_some());

    println!("✓ Pending contact restored once its entity loads");
}

#[test]
fn test_pending_contact_given_up_after_retry_window() {
    let world = World::new();
    let store = SnapshotStore::in_memory();
    save_world(&world, &store);

    let directory = StaticDirectory::new();
    for entity in [&world.alpha, &world.beta, &world.receiver] {
        directory.register(entity);
    }

    let config = RelayConfig {
        restore_retry_ticks: 3,
        ..RelayConfig::default()
    };
    let net = network_with(config);
    world.populate(&net);
    net.restore(&store, Arc::new(directory.clone())).unwrap();

    net.tick();
    net.tick();
    assert_eq!(net.pending_restores(), 1);
    net.tick();
    assert_eq!(net.pending_restores(), 0);

    // Too late now
    directory.register(&world.enemy);
    net.tick();
    assert!(net.storages()[0].contact(500).is_none());

    println!("✓ Unresolvable contact dropped after the retry window");
}

#[test]
fn test_snapshot_of_missing_primary_is_skipped() {
    let world = World::new();
    let store = SnapshotStore::in_memory();
    save_world(&world, &store);

    // Only the beta antenna exists after the reload
    let net = network_with(RelayConfig::default());
    net.add_node(world.beta_antenna.handle(), Box::new(LinkTable::new()))
        .unwrap();
    let report = net.restore(&store, Arc::new(StaticDirectory::new())).unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.storages, 0);
    assert_eq!(net.pending_restores(), 0);

    println!("✓ Snapshot without its primary node is skipped");
}
