// Message types: point-to-point text between endpoints

use crate::clock::GameTime;
use crate::store::snapshot::MessageSnapshot;
use crate::world::{top_most, EntityHandle, EntityId, OwnerId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// A text payload addressed to one endpoint.
///
/// Content and names are fixed at send time. The only mutable state is the
/// validity latch, which can go from valid to invalid but never back.
pub struct Message {
    /// Unique message ID (UUID v4), used as the storage key
    id: Uuid,
    content: String,
    source_id: EntityId,
    /// Grid name of the sender, captured for display
    source_grid_name: String,
    /// Block name of the sender, captured for display
    source_block_name: String,
    destination: EntityHandle,
    /// Owner of the destination when the message was sent. If ownership
    /// changes the message is no longer deliverable.
    dest_owner_id: OwnerId,
    created_at: GameTime,
    valid: AtomicBool,
}

impl Message {
    /// Create a message from `source` to `destination`.
    ///
    /// `source_block_name` overrides the source's display name, for senders
    /// whose name currently carries a command.
    pub fn new(
        content: impl Into<String>,
        destination: EntityHandle,
        source: &EntityHandle,
        source_block_name: Option<String>,
        now: GameTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            source_id: source.id(),
            source_grid_name: top_most(source).display_name(),
            source_block_name: source_block_name.unwrap_or_else(|| source.display_name()),
            dest_owner_id: destination.owner_id(),
            destination,
            created_at: now,
            valid: AtomicBool::new(true),
        }
    }

    /// Rebuild a persisted message against its live destination.
    pub(crate) fn from_snapshot(snapshot: MessageSnapshot, destination: EntityHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: snapshot.content,
            source_id: snapshot.source_block_id,
            source_grid_name: snapshot.source_grid_name,
            source_block_name: snapshot.source_block_name,
            destination,
            dest_owner_id: snapshot.dest_owner_id,
            created_at: snapshot.created_at,
            valid: AtomicBool::new(true),
        }
    }

    pub(crate) fn to_snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            dest_block_id: self.destination.id(),
            source_block_id: self.source_id,
            content: self.content.clone(),
            source_grid_name: self.source_grid_name.clone(),
            source_block_name: self.source_block_name.clone(),
            created_at: self.created_at,
            dest_owner_id: self.dest_owner_id,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_id(&self) -> EntityId {
        self.source_id
    }

    pub fn source_grid_name(&self) -> &str {
        &self.source_grid_name
    }

    pub fn source_block_name(&self) -> &str {
        &self.source_block_name
    }

    pub fn destination(&self) -> &EntityHandle {
        &self.destination
    }

    pub fn destination_id(&self) -> EntityId {
        self.destination.id()
    }

    pub fn dest_owner_id(&self) -> OwnerId {
        self.dest_owner_id
    }

    pub fn created_at(&self) -> GameTime {
        self.created_at
    }

    /// Deliverable: destination still in the world, still owned by the same
    /// owner, message not expired and not yet delivered.
    pub fn is_valid(&self, now: GameTime, lifetime: Duration) -> bool {
        if !self.valid.load(Ordering::Acquire) {
            return false;
        }
        if self.destination.is_closed()
            || self.destination.owner_id() != self.dest_owner_id
            || now.saturating_since(self.created_at) > lifetime
        {
            self.valid.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Take the right to deliver this message.
    ///
    /// Returns true for exactly one caller; the message is invalid
    /// afterwards.
    pub fn claim(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("destination", &self.destination.id())
            .field("created_at", &self.created_at)
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .finish()
    }
}
