//! Relay node
//!
//! A vertex of the communication graph. Each tick the node re-tests its
//! links, merges storages with newly connected nodes, clones its storage
//! when it can no longer reach the storage's primary node and reports its
//! own position.

use super::context::RelayContext;
use super::link::Capability;
use super::registry::Registry;
use super::storage::{MessageHandler, RelayStorage};
use super::{CommunicationType, RelayError};
use crate::contact::{ContactRecord, DetectedBy};
use crate::world::{top_most, EntityHandle, EntityId, OwnerId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace};

#[derive(Default)]
struct Links {
    /// Two-way communication is established with these nodes
    direct: BTreeMap<EntityId, Weak<RelayNode>>,
    /// Data is pushed to these nodes
    one_way: BTreeMap<EntityId, Weak<RelayNode>>,
}

/// Full participant in a relay network
pub struct RelayNode {
    entity: EntityHandle,
    capability: Box<dyn Capability>,
    ctx: Arc<RelayContext>,
    links: RwLock<Links>,
    storage: RwLock<Option<Arc<RelayStorage>>>,
    message_handler: Mutex<Option<MessageHandler>>,
    last_search_id: AtomicU64,
}

impl RelayNode {
    pub fn new(
        entity: EntityHandle,
        capability: Box<dyn Capability>,
        ctx: Arc<RelayContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity,
            capability,
            ctx,
            links: RwLock::new(Links::default()),
            storage: RwLock::new(None),
            message_handler: Mutex::new(None),
            last_search_id: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    pub fn owner_id(&self) -> OwnerId {
        self.entity.owner_id()
    }

    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    pub fn capability(&self) -> &dyn Capability {
        self.capability.as_ref()
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Contains all the contacts and messages for this node
    pub fn storage(&self) -> Option<Arc<RelayStorage>> {
        self.storage.read().clone()
    }

    /// Ids of nodes with an established two-way link
    pub fn direct_connections(&self) -> Vec<EntityId> {
        self.links.read().direct.keys().copied().collect()
    }

    /// Ids of nodes this node pushes to
    pub fn one_way_connections(&self) -> Vec<EntityId> {
        self.links.read().one_way.keys().copied().collect()
    }

    fn direct_nodes(&self) -> Vec<Arc<RelayNode>> {
        self.links
            .read()
            .direct
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn has_storage(&self, storage: &Arc<RelayStorage>) -> bool {
        self.storage
            .read()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, storage))
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Re-test links against every registered node and keep this node's
    /// storage consistent with the rest of its component.
    pub fn update(self: &Arc<Self>, registry: &Registry) {
        let mut send_position_to: Vec<Arc<RelayStorage>> = Vec::new();
        let mut check_primary = false;
        let mut visited = HashSet::new();

        for other in registry.nodes() {
            if other.id() == self.id() {
                continue;
            }
            visited.insert(other.id());

            let link = self.test_connection(&other, &mut send_position_to);

            if link == CommunicationType::TwoWay {
                let added = self
                    .links
                    .write()
                    .direct
                    .insert(other.id(), Arc::downgrade(&other))
                    .is_none();
                if added {
                    debug!("Node {} now connected to {}", self.id(), other.id());
                    self.merge_with(&other);
                }
            } else if self.links.write().direct.remove(&other.id()).is_some() {
                debug!("Node {} no longer connected to {}", self.id(), other.id());
                check_primary = true;
            }

            if let Some(storage) = self.storage() {
                if link == CommunicationType::OneWay {
                    let added = self
                        .links
                        .write()
                        .one_way
                        .insert(other.id(), Arc::downgrade(&other))
                        .is_none();
                    if added {
                        debug!("Node {} new one-way connection to {}", self.id(), other.id());
                        storage.add_push_to(&other);
                    }
                } else if self.links.write().one_way.remove(&other.id()).is_some() {
                    debug!("Node {} lost one-way connection to {}", self.id(), other.id());
                    storage.remove_push_to(other.id());
                }
            }
        }

        if self.forget_departed(&visited) {
            check_primary = true;
        }

        let storage = match self.storage() {
            None => {
                debug!("Node {} has no storage, creating a new one", self.id());
                let storage = RelayStorage::new(self);
                self.set_storage(&storage);
                storage
            }
            Some(storage) if check_primary && !self.is_connected_to(storage.primary_id()) => {
                info!(
                    "Node {} lost connection to primary {}, cloning storage {}",
                    self.id(),
                    storage.primary_id(),
                    storage.id()
                );
                let clone = storage.clone_for(self);
                self.set_storage(&clone);
                clone
            }
            Some(storage) => storage,
        };

        self.report_self(&storage, &send_position_to);
    }

    /// Classify the link to `other`. Storages that should only learn this
    /// node's position are added to `send_position_to`.
    fn test_connection(
        &self,
        other: &Arc<RelayNode>,
        send_position_to: &mut Vec<Arc<RelayStorage>>,
    ) -> CommunicationType {
        let mut position_only = |reason: &str| {
            if !self.capability.can_broadcast_position_to(self, other) {
                return;
            }
            if let Some(storage) = other.storage() {
                if !send_position_to.iter().any(|s| s.id() == storage.id()) {
                    trace!(
                        "{} receiver in range of {}: {}, storage {}",
                        reason,
                        self.id(),
                        other.id(),
                        storage.id()
                    );
                    send_position_to.push(storage);
                }
            }
        };

        if !self
            .ctx
            .relations()
            .can_consider_friendly(self.owner_id(), other.owner_id())
        {
            position_only("Hostile");
            return CommunicationType::None;
        }

        match self.capability.try_connect(self, other) {
            Ok(CommunicationType::None) => {
                position_only("Friendly");
                CommunicationType::None
            }
            Ok(link) => {
                trace!("Link from {} to {} is {}", self.id(), other.id(), link);
                link
            }
            Err(e) => {
                trace!("Link from {} to {} unavailable: {}", self.id(), other.id(), e);
                CommunicationType::None
            }
        }
    }

    /// Drop links to nodes that are no longer registered. Returns true if a
    /// direct link was lost.
    fn forget_departed(&self, registered: &HashSet<EntityId>) -> bool {
        let (lost_direct, lost_one_way) = {
            let mut links = self.links.write();
            let before = links.direct.len();
            links
                .direct
                .retain(|id, node| registered.contains(id) && node.strong_count() > 0);
            let lost_direct = links.direct.len() != before;

            let departed: Vec<EntityId> = links
                .one_way
                .keys()
                .filter(|id| !registered.contains(id))
                .copied()
                .collect();
            for id in &departed {
                links.one_way.remove(id);
            }
            (lost_direct, departed)
        };

        if !lost_one_way.is_empty() {
            if let Some(storage) = self.storage() {
                for id in lost_one_way {
                    storage.remove_push_to(id);
                }
            }
        }
        if lost_direct {
            debug!("Node {} dropped links to departed nodes", self.id());
        }
        lost_direct
    }

    /// Merge storages with a newly connected node.
    ///
    /// The surviving storage is the one whose primary is persistent, then
    /// the larger one, then the older one.
    fn merge_with(self: &Arc<Self>, other: &Arc<RelayNode>) {
        let (mine, theirs) = match (self.storage(), other.storage()) {
            (None, Some(theirs)) => {
                debug!(
                    "Node {} using storage {} from {}",
                    self.id(),
                    theirs.id(),
                    other.id()
                );
                self.set_storage(&theirs);
                return;
            }
            (Some(mine), Some(theirs)) if !Arc::ptr_eq(&mine, &theirs) => (mine, theirs),
            _ => return,
        };

        let keep_mine = match (mine.is_persistent(), theirs.is_persistent()) {
            (true, false) => true,
            (false, true) => false,
            _ => match mine.size().cmp(&theirs.size()) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => mine.id() < theirs.id(),
            },
        };

        let (winner, loser, adopter) = if keep_mine {
            (mine, theirs, other)
        } else {
            (theirs, mine, self)
        };
        debug!(
            "Nodes {} and {} have different storages, copying {} into {}",
            self.id(),
            other.id(),
            loser.id(),
            winner.id()
        );
        if loser.copy_to(&winner).is_ok() {
            adopter.set_storage(&winner);
        }
    }

    /// Switch to `storage`, then make every node reachable through direct
    /// links switch too.
    fn set_storage(self: &Arc<Self>, storage: &Arc<RelayStorage>) {
        let mut pending = vec![Arc::clone(self)];
        while let Some(node) = pending.pop() {
            if !node.replace_storage(storage) {
                continue;
            }
            pending.extend(
                node.direct_nodes()
                    .into_iter()
                    .filter(|neighbour| !neighbour.has_storage(storage)),
            );
        }
    }

    /// Returns false if `storage` was already in use.
    fn replace_storage(&self, storage: &Arc<RelayStorage>) -> bool {
        let old = {
            let mut slot = self.storage.write();
            if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, storage)) {
                return false;
            }
            slot.replace(Arc::clone(storage))
        };

        match &old {
            Some(old) => {
                debug!(
                    "Node {} new storage, primary: {} => {}",
                    self.id(),
                    old.primary_id(),
                    storage.primary_id()
                );
                // One-way links belonged to the old storage
                let released = mem::take(&mut self.links.write().one_way);
                for id in released.keys() {
                    old.remove_push_to(*id);
                }
            }
            None => debug!(
                "Node {} new storage, primary: {}",
                self.id(),
                storage.primary_id()
            ),
        }

        let handler = self.message_handler.lock().clone();
        if let Some(handler) = handler {
            if let Some(old) = &old {
                old.remove_message_handler(self.id());
            }
            if let Err(e) = storage.add_message_handler(self.id(), handler) {
                error!("Node {} could not move its message handler: {}", self.id(), e);
            }
        }
        true
    }

    /// Create a fresh storage with this node as primary, replacing any
    /// current storage.
    pub fn force_create_storage(self: &Arc<Self>) -> Arc<RelayStorage> {
        let storage = RelayStorage::new(self);
        self.set_storage(&storage);
        storage
    }

    /// Set or clear the handler for messages addressed to this node.
    pub fn set_message_handler(&self, handler: Option<MessageHandler>) -> Result<(), RelayError> {
        let mut slot = self.message_handler.lock();
        if let Some(storage) = self.storage() {
            if slot.is_some() {
                storage.remove_message_handler(self.id());
            }
            if let Some(handler) = &handler {
                storage.add_message_handler(self.id(), Arc::clone(handler))?;
            }
        }
        *slot = handler;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reachability
    // ------------------------------------------------------------------------

    /// True if `target` can be reached through direct links.
    ///
    /// Depth-first; each visited node is stamped with the search id so it is
    /// never descended into twice during one search.
    pub fn is_connected_to(self: &Arc<Self>, target: EntityId) -> bool {
        if self.id() == target {
            return true;
        }

        let search_id = self.ctx.next_search_id();
        self.last_search_id.store(search_id, Ordering::Relaxed);

        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            for neighbour in node.direct_nodes() {
                if neighbour.id() == target {
                    return true;
                }
                if neighbour.last_search_id.swap(search_id, Ordering::Relaxed) != search_id {
                    stack.push(neighbour);
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // Self report
    // ------------------------------------------------------------------------

    fn report_self(&self, storage: &Arc<RelayStorage>, send_position_to: &[Arc<RelayStorage>]) {
        let now = self.ctx.now();
        let top = top_most(&self.entity);

        if !send_position_to.is_empty() {
            trace!(
                "Node {} sending position to {} neutral/hostile storages",
                self.id(),
                send_position_to.len()
            );
            RelayStorage::receive_into(
                send_position_to,
                ContactRecord::observe(&top, now, DetectedBy::BROADCASTING),
            );
        }

        if storage.has_very_recent_radar_info(top.id()) {
            return;
        }

        if !self.entity.is_persistent() {
            storage.receive_contact(ContactRecord::observe_with_radar(
                &top,
                now,
                DetectedBy::BROADCASTING,
            ));
            return;
        }

        let mut grids = self.entity.attached();
        if grids.is_empty() {
            grids.push(top);
        }
        storage.receive_contacts(
            grids
                .iter()
                .map(|grid| ContactRecord::observe_with_radar(grid, now, DetectedBy::BROADCASTING)),
        );
    }
}

impl fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayNode")
            .field("id", &self.id())
            .field("direct", &self.direct_connections())
            .field("one_way", &self.one_way_connections())
            .field("storage", &self.storage().map(|s| s.id()))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
