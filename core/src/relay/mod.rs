//! Relay network
//!
//! Nodes that can talk to each other share one `RelayStorage` per connected
//! component. Every tick each node re-tests its links against every other
//! registered node, merges storages when components join and clones its
//! storage when it loses its way back to the storage's primary node.
//!
//! Clients sit beside the graph: they borrow the storage of one attached
//! node to read contacts and to send and receive messages.

pub mod client;
pub mod context;
pub mod link;
pub mod network;
pub mod node;
pub mod registry;
pub mod storage;

pub use client::RelayClient;
pub use context::RelayContext;
pub use link::{Attachment, Capability, Chain, Laser, LinkTable, Radio, RadioSettings};
pub use network::RelayNetwork;
pub use node::RelayNode;
pub use registry::{Registry, RelayPart};
pub use storage::{Delivery, MessageHandler, RelayStorage, StorageId};

use crate::config::ConfigError;
use crate::world::EntityId;
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("A message handler is already registered for entity {0}")]
    HandlerAlreadyRegistered(EntityId),

    #[error("Storage {0} cannot be copied into itself")]
    SelfCopy(StorageId),

    #[error("Entity {0} is already registered")]
    AlreadyRegistered(EntityId),

    #[error("Node {0} has no storage")]
    NoStorage(EntityId),

    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
}

/// Result of testing the link from one node to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommunicationType {
    /// No communication is possible
    #[default]
    None,
    /// Data can be sent from this node to the other node
    OneWay,
    /// Data can be sent both ways
    TwoWay,
}

impl fmt::Display for CommunicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::OneWay => write!(f, "one-way"),
            Self::TwoWay => write!(f, "two-way"),
        }
    }
}
