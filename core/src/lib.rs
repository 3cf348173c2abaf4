// relaynet core: relay and storage synchronization over a changing
// connectivity graph.
//
// Nodes that can reach each other share one storage of contact records and
// messages. As links come and go, storages are merged, split and cloned so
// that every connected component converges on the same picture.

pub mod clock;
pub mod config;
pub mod contact;
pub mod message;
pub mod relay;
pub mod store;
pub mod testing;
pub mod world;

pub use clock::{Clock, GameTime, ManualClock, SystemClock};
pub use config::{ConfigError, RelayConfig};
pub use contact::{ContactRecord, DetectedBy, RadarInfo};
pub use message::{parse_send, Message, ParseError, SendCommand};
pub use relay::{
    CommunicationType, Delivery, MessageHandler, Registry, RelayClient, RelayContext, RelayError,
    RelayNetwork, RelayNode, RelayStorage, StorageId,
};
pub use store::{
    LastSeenSnapshot, MessageSnapshot, NetworkStorageSnapshot, RestoreReport, SnapshotError,
    SnapshotStore,
};
pub use world::{Entity, EntityDirectory, EntityHandle, EntityId, EntityKind, OwnerId, Relations, Vec3};
