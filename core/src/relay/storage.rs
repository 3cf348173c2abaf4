//! Relay storage
//!
//! One `RelayStorage` holds the contacts and messages of one connected
//! component. It is shared by every node of the component and outlives any
//! single node; it goes away when the last node lets go of it.
//!
//! Locking: contacts, messages, push targets and message handlers each sit
//! behind their own lock. No method holds the locks of two different
//! storages at once, and handlers are always invoked with no lock held.
//!
//! Fan-out: a storage may push to other storages through one-way links.
//! Every receive first collects the set of storages reachable through push
//! links, then applies the change to each storage in turn.

use super::context::RelayContext;
use super::node::RelayNode;
use super::RelayError;
use crate::contact::ContactRecord;
use crate::message::Message;
use crate::store::snapshot::NetworkStorageSnapshot;
use crate::world::{EntityId, EntityKind};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// Callback that takes delivery of messages for one endpoint
pub type MessageHandler = Arc<dyn Fn(Arc<Message>) + Send + Sync>;

/// Identity of a storage within its network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageId(u64);

impl StorageId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A handler took it
    Delivered,
    /// No handler was reachable; kept in this many storages
    Stored(usize),
    /// Invalid, already delivered, or every storage was full
    Dropped,
}

struct PushTarget {
    node: Weak<RelayNode>,
    count: usize,
}

/// Shared store of contacts and messages for one component
pub struct RelayStorage {
    id: StorageId,
    ctx: Arc<RelayContext>,
    primary: Weak<RelayNode>,
    primary_id: EntityId,
    persistent: bool,

    contacts: RwLock<HashMap<EntityId, Arc<ContactRecord>>>,
    messages: RwLock<HashMap<Uuid, Arc<Message>>>,
    push_to: RwLock<HashMap<EntityId, PushTarget>>,
    handlers: RwLock<HashMap<EntityId, MessageHandler>>,

    next_clean_contacts: AtomicU64,
    next_clean_messages: AtomicU64,
}

// ============================================================================
// SEND SET
// ============================================================================

/// Storages one receive is applied to. Buffers are pooled per thread so a
/// receive on a hot path does not allocate.
struct SendSet {
    storages: Vec<Arc<RelayStorage>>,
    seen: HashSet<StorageId>,
}

thread_local! {
    static SEND_SET_POOL: RefCell<Vec<(Vec<Arc<RelayStorage>>, HashSet<StorageId>)>> =
        const { RefCell::new(Vec::new()) };
}

impl SendSet {
    fn take() -> Self {
        let (storages, seen) = SEND_SET_POOL
            .try_with(|pool| pool.borrow_mut().pop())
            .ok()
            .flatten()
            .unwrap_or_default();
        Self { storages, seen }
    }

    /// Add `seeds` and every storage reachable from them through push links.
    fn collect<'a>(seeds: impl IntoIterator<Item = &'a Arc<RelayStorage>>) -> Self {
        let mut set = Self::take();
        let mut queue: VecDeque<Arc<RelayStorage>> = VecDeque::new();

        for seed in seeds {
            if set.seen.insert(seed.id) {
                set.storages.push(Arc::clone(seed));
                queue.push_back(Arc::clone(seed));
            }
        }

        while let Some(storage) = queue.pop_front() {
            for target in storage.push_target_storages() {
                if set.seen.insert(target.id) {
                    set.storages.push(Arc::clone(&target));
                    queue.push_back(target);
                }
            }
        }

        set
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<RelayStorage>> {
        self.storages.iter()
    }
}

impl Drop for SendSet {
    fn drop(&mut self) {
        let mut storages = mem::take(&mut self.storages);
        let mut seen = mem::take(&mut self.seen);
        storages.clear();
        seen.clear();
        // Pool is gone during thread teardown; the buffers are just dropped.
        let _ = SEND_SET_POOL.try_with(|pool| pool.borrow_mut().push((storages, seen)));
    }
}

// ============================================================================
// RELAY STORAGE
// ============================================================================

impl RelayStorage {
    /// Create an empty storage with `primary` as its primary node.
    pub fn new(primary: &Arc<RelayNode>) -> Arc<Self> {
        let ctx = Arc::clone(primary.context());
        let next_clean = ctx.tick() + ctx.config().clean_interval_ticks;
        let storage = Arc::new(Self {
            id: StorageId(ctx.next_storage_id()),
            primary: Arc::downgrade(primary),
            primary_id: primary.id(),
            persistent: primary.entity().is_persistent(),
            ctx,
            contacts: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            push_to: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            next_clean_contacts: AtomicU64::new(next_clean),
            next_clean_messages: AtomicU64::new(next_clean),
        });
        debug!("Created storage {} for primary {}", storage.id, storage.primary_id);
        storage
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn primary(&self) -> Option<Arc<RelayNode>> {
        self.primary.upgrade()
    }

    pub fn primary_id(&self) -> EntityId {
        self.primary_id
    }

    /// Primary is block-backed; only such storages are saved.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Contacts plus messages currently held, valid or not
    pub fn size(&self) -> usize {
        self.contact_count() + self.messages.read().len()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.read().len()
    }

    /// Messages still waiting for delivery
    pub fn message_count(&self) -> usize {
        let (now, lifetime) = (self.ctx.now(), self.ctx.config().message_lifetime());
        self.messages
            .read()
            .values()
            .filter(|m| m.is_valid(now, lifetime))
            .count()
    }

    pub fn has_handler(&self, entity_id: EntityId) -> bool {
        self.handlers.read().contains_key(&entity_id)
    }

    // ------------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------------

    /// Merge a contact into this storage and every storage it pushes to.
    pub fn receive_contact(self: &Arc<Self>, record: impl Into<Arc<ContactRecord>>) {
        Self::receive_into(std::slice::from_ref(self), record);
    }

    /// Merge a contact into each of `storages` and everything they push to.
    pub fn receive_into(storages: &[Arc<RelayStorage>], record: impl Into<Arc<ContactRecord>>) {
        let record = record.into();
        let set = SendSet::collect(storages);
        for storage in set.iter() {
            storage.merge_contact(&record);
            storage.clean_contacts_if_due();
        }
    }

    /// Merge several contacts, walking the push links once.
    pub fn receive_contacts<I>(self: &Arc<Self>, records: I)
    where
        I: IntoIterator,
        I::Item: Into<Arc<ContactRecord>>,
    {
        let records: Vec<Arc<ContactRecord>> = records.into_iter().map(Into::into).collect();
        if records.is_empty() {
            return;
        }
        let set = SendSet::collect(std::iter::once(self));
        for storage in set.iter() {
            {
                let mut contacts = storage.contacts.write();
                for record in &records {
                    Self::merge_locked(&mut contacts, record);
                }
            }
            storage.clean_contacts_if_due();
        }
    }

    /// Receive a message into this storage and every storage it pushes to.
    ///
    /// If any of those storages has a handler for the destination, exactly
    /// one handler is invoked and the message is stored nowhere.
    pub fn receive_message(self: &Arc<Self>, message: impl Into<Arc<Message>>) -> Delivery {
        let message = message.into();
        if !message.is_valid(self.ctx.now(), self.ctx.config().message_lifetime()) {
            trace!("Dropping invalid message {}", message.id());
            return Delivery::Dropped;
        }

        let set = SendSet::collect(std::iter::once(self));
        let destination = message.destination_id();

        let handler = set
            .iter()
            .find_map(|storage| storage.handlers.read().get(&destination).cloned());
        if let Some(handler) = handler {
            return if message.claim() {
                debug!("Delivering message {} to {}", message.id(), destination);
                handler(message);
                Delivery::Delivered
            } else {
                Delivery::Dropped
            };
        }

        let mut stored = 0;
        for storage in set.iter() {
            match storage.store_message(&message) {
                Some(Delivery::Delivered) => return Delivery::Delivered,
                Some(_) => stored += 1,
                None => {}
            }
            storage.clean_messages_if_due();
        }

        if stored == 0 {
            Delivery::Dropped
        } else {
            Delivery::Stored(stored)
        }
    }

    fn merge_contact(&self, record: &Arc<ContactRecord>) {
        Self::merge_locked(&mut self.contacts.write(), record);
    }

    /// Insert if absent; replace only if the merge changed something.
    fn merge_locked(contacts: &mut HashMap<EntityId, Arc<ContactRecord>>, record: &Arc<ContactRecord>) {
        match contacts.get(&record.entity_id()) {
            None => {
                contacts.insert(record.entity_id(), Arc::clone(record));
            }
            Some(existing) => {
                if let Some(merged) = record.update(existing) {
                    contacts.insert(record.entity_id(), Arc::new(merged));
                }
            }
        }
    }

    /// Hand the message to a local handler, or store it.
    fn accept_message(&self, message: &Arc<Message>) {
        let handler = self.handlers.read().get(&message.destination_id()).cloned();
        match handler {
            Some(handler) => {
                if message.claim() {
                    handler(Arc::clone(message));
                }
            }
            None => {
                self.store_message(message);
            }
        }
    }

    /// Store `message` unless at capacity. Returns `None` if it was dropped.
    fn store_message(&self, message: &Arc<Message>) -> Option<Delivery> {
        let capacity = self.ctx.config().message_capacity;
        {
            let mut messages = self.messages.write();
            if !messages.contains_key(&message.id()) {
                if messages.len() >= capacity {
                    let (now, lifetime) = (self.ctx.now(), self.ctx.config().message_lifetime());
                    messages.retain(|_, m| m.is_valid(now, lifetime));
                }
                if messages.len() >= capacity {
                    info!(
                        "Storage {} cannot receive more messages, at limit: {}",
                        self.id,
                        messages.len()
                    );
                    return None;
                }
                messages.insert(message.id(), Arc::clone(message));
                debug!("Storage {} got a new message, count is now {}", self.id, messages.len());
            }
        }

        // A handler registered between the lookup and the insert must still
        // see this message.
        let handler = self.handlers.read().get(&message.destination_id()).cloned();
        if let Some(handler) = handler {
            if message.claim() {
                self.messages.write().remove(&message.id());
                handler(Arc::clone(message));
                return Some(Delivery::Delivered);
            }
        }
        Some(Delivery::Stored(1))
    }

    // ------------------------------------------------------------------------
    // Message handlers
    // ------------------------------------------------------------------------

    /// Register the live callback for `entity_id`.
    ///
    /// Messages already stored for `entity_id` are delivered before this
    /// returns.
    pub fn add_message_handler(
        &self,
        entity_id: EntityId,
        handler: MessageHandler,
    ) -> Result<(), RelayError> {
        {
            let mut handlers = self.handlers.write();
            if handlers.contains_key(&entity_id) {
                return Err(RelayError::HandlerAlreadyRegistered(entity_id));
            }
            handlers.insert(entity_id, Arc::clone(&handler));
        }
        debug!("Storage {} added message handler for {}", self.id, entity_id);

        let pending: Vec<Arc<Message>> = {
            let mut messages = self.messages.write();
            let ids: Vec<Uuid> = messages
                .iter()
                .filter(|(_, m)| m.destination_id() == entity_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| messages.remove(id)).collect()
        };

        for message in pending {
            if message.is_valid(self.ctx.now(), self.ctx.config().message_lifetime())
                && message.claim()
            {
                handler(message);
            }
        }
        Ok(())
    }

    /// Unregister the callback for `entity_id`. Does nothing if none is
    /// registered.
    pub fn remove_message_handler(&self, entity_id: EntityId) -> Option<MessageHandler> {
        let removed = self.handlers.write().remove(&entity_id);
        if removed.is_some() {
            debug!("Storage {} removed message handler for {}", self.id, entity_id);
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Copy / clone
    // ------------------------------------------------------------------------

    /// Copy every valid contact and message into `recipient`. No fan-out.
    pub fn copy_to(&self, recipient: &RelayStorage) -> Result<(), RelayError> {
        if recipient.id == self.id {
            error!("Storage {} asked to copy into itself", self.id);
            return Err(RelayError::SelfCopy(self.id));
        }
        debug!(
            "Copying storage {} into {} (primary {})",
            self.id, recipient.id, recipient.primary_id
        );

        let contacts = self.contacts();
        {
            let mut target = recipient.contacts.write();
            for record in &contacts {
                Self::merge_locked(&mut target, record);
            }
        }

        for message in self.messages() {
            recipient.accept_message(&message);
        }
        Ok(())
    }

    /// New storage with `primary` as primary and a copy of all valid content.
    pub fn clone_for(&self, primary: &Arc<RelayNode>) -> Arc<RelayStorage> {
        debug!("Cloning storage {}, new primary {}", self.id, primary.id());
        let clone = RelayStorage::new(primary);

        let contacts = self.contacts();
        clone
            .contacts
            .write()
            .extend(contacts.into_iter().map(|c| (c.entity_id(), c)));

        let messages = self.messages();
        clone
            .messages
            .write()
            .extend(messages.into_iter().map(|m| (m.id(), m)));

        clone
    }

    // ------------------------------------------------------------------------
    // Push links
    // ------------------------------------------------------------------------

    /// Start pushing to `node`'s storage. Content is copied only when this is
    /// the first link to a storage not already pushed to.
    pub fn add_push_to(&self, node: &Arc<RelayNode>) {
        let (count, others) = {
            let mut push_to = self.push_to.write();
            let entry = push_to.entry(node.id()).or_insert_with(|| PushTarget {
                node: Arc::downgrade(node),
                count: 0,
            });
            entry.count += 1;
            let count = entry.count;
            let others: Vec<Weak<RelayNode>> = push_to
                .iter()
                .filter(|(id, _)| **id != node.id())
                .map(|(_, target)| target.node.clone())
                .collect();
            (count, others)
        };
        debug!("Storage {} added push to {}, count: {}", self.id, node.id(), count);

        if count != 1 {
            trace!("Not first connection to {}, no copy", node.id());
            return;
        }

        let Some(target) = node.storage() else {
            trace!("Push target {} has no storage, no copy", node.id());
            return;
        };
        if target.id == self.id {
            trace!("Push target {} shares this storage, no copy", node.id());
            return;
        }
        let already_pushing = others
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|other| other.storage())
            .any(|other| other.id == target.id);
        if already_pushing {
            trace!("Already pushing to storage {}, no copy", target.id);
            return;
        }

        // Checked above; copy_to only fails on a self copy.
        let _ = self.copy_to(&target);
    }

    /// Drop one reference to the push link to `node_id`.
    pub fn remove_push_to(&self, node_id: EntityId) {
        let mut push_to = self.push_to.write();
        match push_to.get_mut(&node_id) {
            Some(target) if target.count > 1 => {
                target.count -= 1;
                debug!("Storage {} removed push to {}, count: {}", self.id, node_id, target.count);
            }
            Some(_) => {
                push_to.remove(&node_id);
                debug!("Storage {} removed push to {}, count: 0", self.id, node_id);
            }
            None => {
                error!("Storage {} has no push link to {}", self.id, node_id);
            }
        }
    }

    pub fn push_count(&self, node_id: EntityId) -> usize {
        self.push_to.read().get(&node_id).map_or(0, |t| t.count)
    }

    /// Current storages of every node this storage pushes to
    fn push_target_storages(&self) -> Vec<Arc<RelayStorage>> {
        let nodes: Vec<Weak<RelayNode>> = self
            .push_to
            .read()
            .values()
            .map(|target| target.node.clone())
            .collect();
        nodes
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|node| node.storage())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Iteration and sweeps
    // ------------------------------------------------------------------------

    /// All valid contacts. Invalid ones are removed on the way.
    pub fn contacts(&self) -> Vec<Arc<ContactRecord>> {
        let (now, lifetime) = (self.ctx.now(), self.ctx.config().contact_lifetime());
        let (valid, invalid): (Vec<_>, Vec<_>) = self
            .contacts
            .read()
            .values()
            .cloned()
            .partition(|c| c.is_valid(now, lifetime));

        if !invalid.is_empty() {
            debug!("Storage {} removing {} invalid contacts", self.id, invalid.len());
            let mut contacts = self.contacts.write();
            for record in &invalid {
                // Only remove the exact record found invalid
                if contacts
                    .get(&record.entity_id())
                    .is_some_and(|current| Arc::ptr_eq(current, record))
                {
                    contacts.remove(&record.entity_id());
                }
            }
        }

        self.next_clean_contacts.store(
            self.ctx.tick() + self.ctx.config().clean_interval_ticks,
            Ordering::Relaxed,
        );
        valid
    }

    pub fn for_each_contact(&self, mut f: impl FnMut(&ContactRecord)) {
        for record in self.contacts() {
            f(&record);
        }
    }

    /// First valid contact matching `predicate`
    pub fn search_contacts(
        &self,
        mut predicate: impl FnMut(&ContactRecord) -> bool,
    ) -> Option<Arc<ContactRecord>> {
        self.contacts().into_iter().find(|c| predicate(c))
    }

    /// All valid messages. Invalid ones are removed on the way.
    pub fn messages(&self) -> Vec<Arc<Message>> {
        let (now, lifetime) = (self.ctx.now(), self.ctx.config().message_lifetime());
        let (valid, invalid): (Vec<_>, Vec<_>) = self
            .messages
            .read()
            .values()
            .cloned()
            .partition(|m| m.is_valid(now, lifetime));

        if !invalid.is_empty() {
            debug!("Storage {} removing {} invalid messages", self.id, invalid.len());
            let mut messages = self.messages.write();
            for message in &invalid {
                messages.remove(&message.id());
            }
        }

        self.next_clean_messages.store(
            self.ctx.tick() + self.ctx.config().clean_interval_ticks,
            Ordering::Relaxed,
        );
        valid
    }

    pub fn for_each_message(&self, mut f: impl FnMut(&Message)) {
        for message in self.messages() {
            f(&message);
        }
    }

    /// Look up a contact without sweeping
    pub fn contact(&self, entity_id: EntityId) -> Option<Arc<ContactRecord>> {
        self.contacts.read().get(&entity_id).cloned()
    }

    /// Radar info for `entity_id` is too fresh to be worth refreshing
    pub fn has_very_recent_radar_info(&self, entity_id: EntityId) -> bool {
        self.contact(entity_id).is_some_and(|record| {
            record.radar_info_is_recent(self.ctx.now(), self.ctx.config().very_recent_radar())
        })
    }

    /// Sweep both maps now
    pub fn clean(&self) {
        let _ = self.contacts();
        let _ = self.messages();
    }

    fn clean_contacts_if_due(&self) {
        if self.next_clean_contacts.load(Ordering::Relaxed) <= self.ctx.tick() {
            info!("Running cleanup on contacts of storage {}", self.id);
            let _ = self.contacts();
        }
    }

    fn clean_messages_if_due(&self) {
        if self.next_clean_messages.load(Ordering::Relaxed) <= self.ctx.tick() {
            info!("Running cleanup on messages of storage {}", self.id);
            let _ = self.messages();
        }
    }

    /// Sweep if the clean interval has passed. Called by the owning network
    /// so idle storages still get cleaned.
    pub fn clean_if_due(&self) {
        self.clean_contacts_if_due();
        self.clean_messages_if_due();
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Persistable state, or `None` for a transient storage.
    ///
    /// Only grid contacts are kept; other entities don't survive a reload.
    pub fn to_snapshot(&self) -> Option<NetworkStorageSnapshot> {
        if !self.persistent {
            return None;
        }
        let last_seen = self
            .contacts()
            .iter()
            .filter(|c| c.kind() == EntityKind::Grid)
            .map(|c| c.to_snapshot())
            .collect();
        let messages = self.messages().iter().map(|m| m.to_snapshot()).collect();
        Some(NetworkStorageSnapshot {
            primary_node_id: self.primary_id,
            last_seen,
            messages,
        })
    }

    /// Insert a restored contact directly, no fan-out.
    pub(crate) fn restore_contact(&self, record: ContactRecord) {
        self.merge_contact(&Arc::new(record));
    }

    /// Insert a restored message directly, no fan-out. False if full.
    pub(crate) fn restore_message(&self, message: &Arc<Message>) -> bool {
        self.store_message(message).is_some()
    }
}

impl fmt::Debug for RelayStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayStorage")
            .field("id", &self.id)
            .field("primary_id", &self.primary_id)
            .field("persistent", &self.persistent)
            .field("contacts", &self.contacts.read().len())
            .field("messages", &self.messages.read().len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
