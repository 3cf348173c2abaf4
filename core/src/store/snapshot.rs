//! Storage snapshots
//!
//! One `NetworkStorageSnapshot` per persistent storage, keyed by the id of
//! the storage's primary node. Values are bincode encoded.

use super::backend::{BackendError, MemoryBackend, SledBackend, StorageBackend};
use crate::clock::GameTime;
use crate::contact::RadarInfo;
use crate::world::{EntityId, OwnerId, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Name of the sled tree holding snapshots
pub const SNAPSHOT_TREE: &str = "network_storage";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Failed to encode snapshot of {primary}: {source}")]
    Encode {
        primary: EntityId,
        source: bincode::Error,
    },

    #[error("Failed to decode snapshot: {0}")]
    Decode(bincode::Error),

    #[error("Malformed snapshot key ({0} bytes)")]
    BadKey(usize),
}

// ============================================================================
// SNAPSHOT TYPES
// ============================================================================

/// Persisted contact record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSeenSnapshot {
    pub entity_id: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub last_seen_at: GameTime,
    pub last_broadcast: Option<GameTime>,
    pub last_radar: Option<GameTime>,
    pub last_jam: Option<GameTime>,
    pub radar_info: Option<RadarInfo>,
}

/// Persisted message. Two equal snapshots describe the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub dest_block_id: EntityId,
    pub source_block_id: EntityId,
    pub content: String,
    pub source_grid_name: String,
    pub source_block_name: String,
    pub created_at: GameTime,
    pub dest_owner_id: OwnerId,
}

/// Persisted state of one storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStorageSnapshot {
    pub primary_node_id: EntityId,
    pub last_seen: Vec<LastSeenSnapshot>,
    pub messages: Vec<MessageSnapshot>,
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

pub struct SnapshotStore {
    backend: Box<dyn StorageBackend>,
}

impl SnapshotStore {
    /// Open (or create) a sled database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let backend = SledBackend::open(path, SNAPSHOT_TREE)?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Replace the stored snapshots with `snapshots`
    pub fn save_all(&self, snapshots: &[NetworkStorageSnapshot]) -> Result<usize, SnapshotError> {
        self.backend.clear()?;
        for snapshot in snapshots {
            let primary = snapshot.primary_node_id;
            let value = bincode::serialize(snapshot)
                .map_err(|source| SnapshotError::Encode { primary, source })?;
            self.backend.put(&primary.to_be_bytes(), &value)?;
        }
        self.backend.flush()?;
        debug!("Saved {} storage snapshots", snapshots.len());
        Ok(snapshots.len())
    }

    pub fn load_all(&self) -> Result<Vec<NetworkStorageSnapshot>, SnapshotError> {
        self.backend
            .scan()?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    pub fn get(&self, primary: EntityId) -> Result<Option<NetworkStorageSnapshot>, SnapshotError> {
        self.backend
            .get(&primary.to_be_bytes())?
            .map(|value| decode(&value))
            .transpose()
    }

    /// Primary node ids with a stored snapshot
    pub fn list(&self) -> Result<Vec<EntityId>, SnapshotError> {
        self.backend
            .scan()?
            .into_iter()
            .map(|(key, _)| {
                let bytes: [u8; 8] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| SnapshotError::BadKey(key.len()))?;
                Ok(EntityId::from_be_bytes(bytes))
            })
            .collect()
    }
}

fn decode(value: &[u8]) -> Result<NetworkStorageSnapshot, SnapshotError> {
    bincode::deserialize(value).map_err(SnapshotError::Decode)
}
