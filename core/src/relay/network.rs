//! Relay network
//!
//! Owns the context and registry of one network and drives it: every call to
//! [`RelayNetwork::tick`] updates each node once, lets every client follow
//! its node's storage, sweeps storages that are due and retries contacts
//! waiting on a restore.

use super::client::RelayClient;
use super::context::RelayContext;
use super::link::Capability;
use super::node::RelayNode;
use super::registry::{RelayPart, Registry};
use super::storage::{MessageHandler, RelayStorage};
use super::RelayError;
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::store::{restore_snapshots, PendingRestore, RestoreReport, SnapshotError, SnapshotStore};
use crate::world::{EntityDirectory, EntityHandle, EntityId, Relations};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RelayNetwork {
    ctx: Arc<RelayContext>,
    registry: Registry,
    pending: Mutex<PendingRestore>,
}

impl RelayNetwork {
    pub fn new(
        config: RelayConfig,
        clock: Arc<dyn Clock>,
        relations: Arc<dyn Relations>,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self::with_context(Arc::new(RelayContext::new(config, clock, relations))))
    }

    pub fn with_context(ctx: Arc<RelayContext>) -> Self {
        Self {
            ctx,
            registry: Registry::new(),
            pending: Mutex::new(PendingRestore::default()),
        }
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn add_node(
        &self,
        entity: EntityHandle,
        capability: Box<dyn Capability>,
    ) -> Result<Arc<RelayNode>, RelayError> {
        let node = RelayNode::new(entity, capability, Arc::clone(&self.ctx));
        self.registry.add_node(Arc::clone(&node))?;
        Ok(node)
    }

    pub fn add_client(
        &self,
        entity: EntityHandle,
        handler: Option<MessageHandler>,
    ) -> Result<Arc<RelayClient>, RelayError> {
        let client = RelayClient::new(entity, handler, Arc::clone(&self.ctx));
        self.registry.add_client(Arc::clone(&client))?;
        Ok(client)
    }

    pub fn remove(&self, id: EntityId) -> Option<RelayPart> {
        self.registry.remove(id)
    }

    /// Advance one scheduler tick
    pub fn tick(&self) -> u64 {
        let tick = self.ctx.advance_tick();

        for node in self.registry.nodes() {
            node.update(&self.registry);
        }
        // Moves each client's handler after merges and clones
        for client in self.registry.clients() {
            client.storage(&self.registry);
        }
        for storage in self.registry.storages() {
            storage.clean_if_due();
        }

        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            pending.retry(tick);
        }
        tick
    }

    /// Distinct storages in use
    pub fn storages(&self) -> Vec<Arc<RelayStorage>> {
        self.registry.storages()
    }

    /// Number of connected components that currently hold a storage
    pub fn component_count(&self) -> usize {
        self.storages().len()
    }

    /// Contacts still waiting on a restore
    pub fn pending_restores(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write every persistent storage to `store`, replacing what was there
    pub fn save(&self, store: &SnapshotStore) -> Result<usize, SnapshotError> {
        let mut primaries = HashSet::new();
        let snapshots: Vec<_> = self
            .storages()
            .iter()
            .filter_map(|storage| storage.to_snapshot())
            .filter(|snapshot| primaries.insert(snapshot.primary_node_id))
            .collect();
        let saved = store.save_all(&snapshots)?;
        info!("Saved {} storages at tick {}", saved, self.ctx.tick());
        Ok(saved)
    }

    /// Load snapshots from `store` into the storages of registered nodes.
    ///
    /// Nodes must be registered first. Contacts whose entity is not in
    /// `directory` yet are retried on later ticks.
    pub fn restore(
        &self,
        store: &SnapshotStore,
        directory: Arc<dyn EntityDirectory>,
    ) -> Result<RestoreReport, SnapshotError> {
        let snapshots = store.load_all()?;
        let give_up_at = self.ctx.tick() + self.ctx.config().restore_retry_ticks;
        let mut pending = self.pending.lock();
        Ok(restore_snapshots(
            snapshots,
            &self.registry,
            directory,
            &mut pending,
            give_up_at,
        ))
    }

    /// Drop every node, client and pending restore
    pub fn shutdown(&self) {
        debug!(
            "Shutting down network with {} nodes and {} clients",
            self.registry.node_count(),
            self.registry.client_count()
        );
        self.registry.shutdown();
        *self.pending.lock() = PendingRestore::default();
    }
}
