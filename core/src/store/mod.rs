// Store module: snapshot persistence and restore

pub mod backend;
pub mod restore;
pub mod snapshot;

pub use backend::{BackendError, MemoryBackend, SledBackend, StorageBackend};
pub use restore::{restore_snapshots, PendingRestore, RestoreReport};
pub use snapshot::{
    LastSeenSnapshot, MessageSnapshot, NetworkStorageSnapshot, SnapshotError, SnapshotStore,
};
