// Rebuilding storages from snapshots
//
// Snapshots reference entities by id. Entities that cannot be resolved yet
// (e.g. still streaming in after a load) are parked and retried on later
// ticks until a deadline, then dropped.

use super::snapshot::{LastSeenSnapshot, MessageSnapshot, NetworkStorageSnapshot};
use crate::contact::ContactRecord;
use crate::message::Message;
use crate::relay::{RelayStorage, Registry};
use crate::world::{EntityDirectory, EntityId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Outcome of one restore pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Snapshots applied to a storage
    pub storages: usize,
    /// Snapshots skipped because their primary node is not registered
    pub skipped: usize,
    pub contacts: usize,
    pub messages: usize,
    /// Contacts parked until their entity appears
    pub pending: usize,
}

struct PendingContact {
    storage: Weak<RelayStorage>,
    snapshot: LastSeenSnapshot,
    give_up_at: u64,
}

/// Contacts whose entity could not be resolved at restore time
#[derive(Default)]
pub struct PendingRestore {
    directory: Option<Arc<dyn EntityDirectory>>,
    contacts: Vec<PendingContact>,
}

impl PendingRestore {
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Retry every parked contact. Returns how many were restored.
    pub fn retry(&mut self, tick: u64) -> usize {
        let Some(directory) = self.directory.clone() else {
            return 0;
        };
        let mut restored = 0;

        self.contacts.retain(|pending| {
            let Some(storage) = pending.storage.upgrade() else {
                return false;
            };
            let id = pending.snapshot.entity_id;
            if let Some(entity) = directory.entity(id) {
                storage.restore_contact(ContactRecord::from_snapshot(&pending.snapshot, entity));
                restored += 1;
                return false;
            }
            if tick >= pending.give_up_at {
                warn!(
                    "Giving up restoring contact {} into storage {}: entity never appeared",
                    id,
                    storage.id()
                );
                return false;
            }
            true
        });

        if restored > 0 {
            debug!("Restored {} pending contacts, {} still waiting", restored, self.contacts.len());
        }
        if self.contacts.is_empty() {
            self.directory = None;
        }
        restored
    }

    fn park(&mut self, storage: &Arc<RelayStorage>, snapshot: LastSeenSnapshot, give_up_at: u64) {
        self.contacts.push(PendingContact {
            storage: Arc::downgrade(storage),
            snapshot,
            give_up_at,
        });
    }
}

/// Apply `snapshots` to the storages of registered nodes.
///
/// A primary node without a storage gets a fresh one. Messages are matched
/// across snapshots so a message held by several storages is restored as a
/// single shared message.
pub fn restore_snapshots(
    snapshots: Vec<NetworkStorageSnapshot>,
    registry: &Registry,
    directory: Arc<dyn EntityDirectory>,
    pending: &mut PendingRestore,
    give_up_at: u64,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    let mut restored_messages: HashMap<MessageSnapshot, Arc<Message>> = HashMap::new();

    for snapshot in snapshots {
        let primary: EntityId = snapshot.primary_node_id;
        let Some(node) = registry.node(primary) else {
            warn!("Cannot restore storage: primary node {} is not registered", primary);
            report.skipped += 1;
            continue;
        };
        let storage = match node.storage() {
            Some(storage) => storage,
            None => node.force_create_storage(),
        };

        for last_seen in snapshot.last_seen {
            match directory.entity(last_seen.entity_id) {
                Some(entity) => {
                    storage.restore_contact(ContactRecord::from_snapshot(&last_seen, entity));
                    report.contacts += 1;
                }
                None => {
                    debug!("Contact {} not resolvable yet, parking", last_seen.entity_id);
                    pending.park(&storage, last_seen, give_up_at);
                    report.pending += 1;
                }
            }
        }

        for message_snapshot in snapshot.messages {
            let message = match restored_messages.get(&message_snapshot) {
                Some(message) => Arc::clone(message),
                None => {
                    let Some(destination) = directory.entity(message_snapshot.dest_block_id) else {
                        warn!(
                            "Dropping restored message for missing block {}",
                            message_snapshot.dest_block_id
                        );
                        continue;
                    };
                    let message = Arc::new(Message::from_snapshot(
                        message_snapshot.clone(),
                        destination,
                    ));
                    restored_messages.insert(message_snapshot, Arc::clone(&message));
                    message
                }
            };
            if storage.restore_message(&message) {
                report.messages += 1;
            }
        }

        report.storages += 1;
    }

    if !pending.is_empty() {
        pending.directory = Some(directory);
    }
    info!(
        "Restored {} storages ({} contacts, {} messages, {} pending, {} skipped)",
        report.storages, report.contacts, report.messages, report.pending, report.skipped
    );
    report
}
