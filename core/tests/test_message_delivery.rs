// Integration tests for message delivery
//
// Messages reach exactly one handler no matter how many storages they are
// pushed into, wait in storage for an endpoint that is not listening yet,
// and expire when they can no longer be delivered.

use relaynet_core::contact::{ContactRecord, DetectedBy};
use relaynet_core::message::append_received;
use relaynet_core::relay::client::collecting_handler;
use relaynet_core::relay::{LinkTable, MessageHandler};
use relaynet_core::testing::{context_with, FixedRelations, TestEntity};
use relaynet_core::{
    Delivery, ManualClock, Message, RelayConfig, RelayNetwork, RelayNode, RelayStorage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn network_with(config: RelayConfig) -> (Arc<ManualClock>, RelayNetwork) {
    let clock = Arc::new(ManualClock::default());
    let net = RelayNetwork::new(config, clock.clone(), Arc::new(FixedRelations::new())).unwrap();
    (clock, net)
}

fn counting_handler(counter: &Arc<AtomicUsize>) -> MessageHandler {
    let counter = Arc::clone(counter);
    Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Node 1 pushes to nodes 2 and 3 over one-way links
fn fan_out(net: &RelayNetwork) -> Vec<Arc<RelayStorage>> {
    let links = LinkTable::new();
    let nodes: Vec<Arc<RelayNode>> = (1..=3)
        .map(|id| {
            net.add_node(TestEntity::block(id, 1).handle(), Box::new(links.clone()))
                .unwrap()
        })
        .collect();
    links.connect_one_way(1, 2);
    links.connect_one_way(1, 3);
    net.tick();
    net.tick();
    nodes.iter().map(|n| n.storage().unwrap()).collect()
}

fn message_to(net: &RelayNetwork, dest: &TestEntity) -> Message {
    let source = TestEntity::block(99, 1).named("Console");
    Message::new("ping", dest.handle(), &source.handle(), None, net.context().now())
}

#[test]
fn test_single_delivery_across_pushed_storages() {
    let (_clock, net) = network_with(RelayConfig::default());
    let storages = fan_out(&net);
    assert_eq!(net.component_count(), 3);

    let deliveries = Arc::new(AtomicUsize::new(0));
    storages[1]
        .add_message_handler(50, counting_handler(&deliveries))
        .unwrap();
    storages[2]
        .add_message_handler(50, counting_handler(&deliveries))
        .unwrap();

    let dest = TestEntity::block(50, 1);
    assert_eq!(storages[0].receive_message(message_to(&net, &dest)), Delivery::Delivered);
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    for storage in &storages {
        assert_eq!(storage.message_count(), 0);
    }

    println!("✓ Message delivered once across three reachable storages");
}

#[test]
fn test_concurrent_handlers_deliver_stored_message_once() {
    let (_clock, net) = network_with(RelayConfig::default());
    let storages = fan_out(&net);

    let dest = TestEntity::block(50, 1);
    assert_eq!(
        storages[0].receive_message(message_to(&net, &dest)),
        Delivery::Stored(3)
    );

    let deliveries = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(storages.len()));
    let workers: Vec<_> = storages
        .iter()
        .map(|storage| {
            let storage = Arc::clone(storage);
            let handler = counting_handler(&deliveries);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                storage.add_message_handler(50, handler).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);

    println!("✓ Racing handler registrations deliver a stored message once");
}

#[test]
fn test_message_expires_in_storage() {
    let config = RelayConfig {
        message_lifetime_secs: 60,
        ..RelayConfig::default()
    };
    let (clock, net) = network_with(config);
    let storages = fan_out(&net);

    let dest = TestEntity::block(50, 1);
    storages[1].receive_message(message_to(&net, &dest));
    assert_eq!(storages[1].message_count(), 1);

    clock.advance(Duration::from_secs(61));
    assert_eq!(storages[1].message_count(), 0);

    let deliveries = Arc::new(AtomicUsize::new(0));
    storages[1]
        .add_message_handler(50, counting_handler(&deliveries))
        .unwrap();
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    assert!(storages[1].messages().is_empty());

    println!("✓ Expired message is never delivered");
}

#[test]
fn test_message_to_closed_block_is_dropped() {
    let (_clock, net) = network_with(RelayConfig::default());
    let storages = fan_out(&net);

    let dest = TestEntity::block(50, 1);
    let message = Arc::new(message_to(&net, &dest));
    storages[2].receive_message(Arc::clone(&message));
    dest.close();

    assert!(storages[2].messages().is_empty());
    assert_eq!(storages[2].receive_message(message), Delivery::Dropped);

    println!("✓ Messages for closed blocks are dropped");
}

#[test]
fn test_capacity_limits_stored_messages() {
    let config = RelayConfig {
        message_capacity: 2,
        ..RelayConfig::default()
    };
    let (_clock, net) = network_with(config);
    let storages = fan_out(&net);
    let dest = TestEntity::block(50, 1);

    assert_eq!(storages[2].receive_message(message_to(&net, &dest)), Delivery::Stored(1));
    assert_eq!(storages[2].receive_message(message_to(&net, &dest)), Delivery::Stored(1));
    assert_eq!(storages[2].receive_message(message_to(&net, &dest)), Delivery::Dropped);
    assert_eq!(storages[2].message_count(), 2);

    println!("✓ Storage drops messages beyond capacity");
}

#[test]
fn test_named_send_between_ships() {
    let (_clock, net) = network_with(RelayConfig::default());
    let links = LinkTable::new();

    let alpha = TestEntity::grid(10, 1).named("Alpha");
    let beta = TestEntity::grid(20, 1).named("Beta");
    let alpha_antenna = TestEntity::block(11, 1).named("Antenna").attached_to(&alpha);
    let beta_antenna = TestEntity::block(21, 1).named("Antenna").attached_to(&beta);
    net.add_node(alpha_antenna.handle(), Box::new(links.clone())).unwrap();
    net.add_node(beta_antenna.handle(), Box::new(links.clone())).unwrap();
    links.connect(11, 21);
    net.tick();
    assert_eq!(net.component_count(), 1);

    let receiver = TestEntity::block(12, 1).named("Receiver Prog").attached_to(&alpha);
    let sender = TestEntity::block(22, 1).named("Sender").attached_to(&beta);
    let (handler, inbox) = collecting_handler();
    let receiving = net.add_client(receiver.handle(), Some(handler)).unwrap();
    let sending = net.add_client(sender.handle(), None).unwrap();

    // Receiver has not attached its handler yet, so the message waits
    let (clean_name, sent) = sending
        .send_from_name(net.registry(), "Sender[.[alpha:receiver:hello:world].]")
        .unwrap();
    assert_eq!(clean_name, "Sender");
    assert_eq!(sent, 1);
    assert!(inbox.lock().is_empty());

    let storage = receiving.storage(net.registry()).unwrap();
    assert_eq!(storage.message_count(), 0);

    let received = inbox.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content(), "hello:world");
    assert_eq!(
        append_received("Receiver Prog", &received[0]),
        "Receiver Prog<.<Beta:Sender:hello:world>.>"
    );

    println!("✓ Name-addressed message reaches a client on another ship");
}

#[test]
fn test_listening_client_follows_merge_and_split() {
    let (_clock, net) = network_with(RelayConfig::default());
    let links = LinkTable::new();

    let alpha = TestEntity::grid(10, 1).named("Alpha");
    let beta = TestEntity::grid(20, 1).named("Beta");
    let alpha_antenna = TestEntity::block(11, 1).attached_to(&alpha);
    let beta_antenna = TestEntity::block(21, 1).attached_to(&beta);
    let alpha_node = net.add_node(alpha_antenna.handle(), Box::new(links.clone())).unwrap();
    let beta_node = net.add_node(beta_antenna.handle(), Box::new(links.clone())).unwrap();

    let listener = TestEntity::block(22, 1).named("Listener").attached_to(&beta);
    let (handler, inbox) = collecting_handler();
    net.add_client(listener.handle(), Some(handler)).unwrap();

    net.tick();
    assert_eq!(net.component_count(), 2);
    let beta_storage = beta_node.storage().unwrap();
    assert!(beta_storage.has_handler(22));

    // Alpha holds more records, so its storage survives the merge
    let alpha_storage = alpha_node.storage().unwrap();
    for id in 100..105 {
        alpha_storage.receive_contact(ContactRecord::observe(
            &TestEntity::grid(id, 2).handle(),
            net.context().now(),
            DetectedBy::BY_RADAR,
        ));
    }

    links.connect(11, 21);
    net.tick();
    let shared = beta_node.storage().unwrap();
    assert!(Arc::ptr_eq(&shared, &alpha_storage));
    assert!(!beta_storage.has_handler(22));
    assert!(shared.has_handler(22));

    assert_eq!(shared.receive_message(message_to(&net, &listener)), Delivery::Delivered);
    assert_eq!(inbox.lock().len(), 1);
    assert_eq!(shared.message_count(), 0);

    // Beta loses the link and clones; the handler moves to the clone
    links.disconnect(11, 21);
    net.tick();
    let clone = beta_node.storage().unwrap();
    assert!(!Arc::ptr_eq(&clone, &shared));
    assert!(!shared.has_handler(22));
    assert!(clone.has_handler(22));

    assert_eq!(clone.receive_message(message_to(&net, &listener)), Delivery::Delivered);
    assert_eq!(inbox.lock().len(), 2);

    println!("✓ Listening client keeps receiving across merge and split");
}

#[test]
fn test_context_helper_drives_storage_directly() {
    let (clock, ctx) = context_with(RelayConfig::default());
    let node = RelayNode::new(
        TestEntity::block(1, 1).handle(),
        Box::new(LinkTable::new()),
        Arc::clone(&ctx),
    );
    let storage = node.force_create_storage();
    let dest = TestEntity::block(50, 1);
    let source = TestEntity::block(2, 1).handle();

    storage.receive_message(Message::new("later", dest.handle(), &source, None, ctx.now()));
    clock.advance(Duration::from_secs(10));
    assert_eq!(storage.message_count(), 1);

    println!("✓ Storage works without a network driving it");
}
