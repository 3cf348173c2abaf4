// Registry of the nodes and clients of one network
//
// Lookup by entity id and ordered iteration. Owned by the network and passed
// to nodes and clients by reference; torn down with `shutdown()`.

use super::client::RelayClient;
use super::context::RelayContext;
use super::node::RelayNode;
use super::storage::{MessageHandler, RelayStorage};
use super::RelayError;
use crate::clock::GameTime;
use crate::message::Message;
use crate::world::{top_most, EntityHandle, EntityId, EntityKind, Relations};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A registered participant
#[derive(Debug, Clone)]
pub enum RelayPart {
    Node(Arc<RelayNode>),
    Client(Arc<RelayClient>),
}

impl RelayPart {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Node(node) => node.id(),
            Self::Client(client) => client.id(),
        }
    }

    pub fn entity(&self) -> &EntityHandle {
        match self {
            Self::Node(node) => node.entity(),
            Self::Client(client) => client.entity(),
        }
    }

    pub fn storage(&self, registry: &Registry) -> Option<Arc<RelayStorage>> {
        match self {
            Self::Node(node) => node.storage(),
            Self::Client(client) => client.storage(registry),
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    nodes: RwLock<BTreeMap<EntityId, Arc<RelayNode>>>,
    clients: RwLock<BTreeMap<EntityId, Arc<RelayClient>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Arc<RelayNode>) -> Result<(), RelayError> {
        let id = node.id();
        if self.clients.read().contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }
        nodes.insert(id, node);
        debug!("Registered node {}", id);
        Ok(())
    }

    pub fn add_client(&self, client: Arc<RelayClient>) -> Result<(), RelayError> {
        let id = client.id();
        if self.nodes.read().contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }
        let mut clients = self.clients.write();
        if clients.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }
        clients.insert(id, client);
        debug!("Registered client {}", id);
        Ok(())
    }

    /// Unregister whatever is registered for `id`
    pub fn remove(&self, id: EntityId) -> Option<RelayPart> {
        if let Some(node) = self.nodes.write().remove(&id) {
            debug!("Removed node {}", id);
            return Some(RelayPart::Node(node));
        }
        let client = self.clients.write().remove(&id)?;
        client.detach();
        debug!("Removed client {}", id);
        Some(RelayPart::Client(client))
    }

    pub fn node(&self, id: EntityId) -> Option<Arc<RelayNode>> {
        self.nodes.read().get(&id).cloned()
    }

    pub fn client(&self, id: EntityId) -> Option<Arc<RelayClient>> {
        self.clients.read().get(&id).cloned()
    }

    pub fn contains_node(&self, id: EntityId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// The node or client registered for `id`
    pub fn part(&self, id: EntityId) -> Option<RelayPart> {
        self.node(id)
            .map(RelayPart::Node)
            .or_else(|| self.client(id).map(RelayPart::Client))
    }

    /// The node or client for `entity`, creating a client if neither exists.
    pub fn get_or_create_part(
        &self,
        entity: &EntityHandle,
        handler: Option<MessageHandler>,
        ctx: &Arc<RelayContext>,
    ) -> Result<RelayPart, RelayError> {
        if let Some(part) = self.part(entity.id()) {
            return Ok(part);
        }
        let client = RelayClient::new(Arc::clone(entity), handler, Arc::clone(ctx));
        self.add_client(Arc::clone(&client))?;
        Ok(RelayPart::Client(client))
    }

    /// Snapshot of registered nodes, ordered by id
    pub fn nodes(&self) -> Vec<Arc<RelayNode>> {
        self.nodes.read().values().cloned().collect()
    }

    /// Snapshot of registered clients, ordered by id
    pub fn clients(&self) -> Vec<Arc<RelayClient>> {
        self.clients.read().values().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Distinct storages in use by registered nodes
    pub fn storages(&self) -> Vec<Arc<RelayStorage>> {
        let mut seen = HashSet::new();
        self.nodes()
            .iter()
            .filter_map(|node| node.storage())
            .filter(|storage| seen.insert(storage.id()))
            .collect()
    }

    /// One message per registered endpoint whose grid name loosely contains
    /// `grid` and whose name loosely contains `block`, limited to endpoints
    /// the source may control.
    #[allow(clippy::too_many_arguments)]
    pub fn build_messages(
        &self,
        content: &str,
        grid: &str,
        block: &str,
        source: &EntityHandle,
        source_block_name: Option<String>,
        relations: &dyn Relations,
        now: GameTime,
    ) -> Vec<Message> {
        let mut endpoints: Vec<EntityHandle> = self
            .clients()
            .iter()
            .map(|client| Arc::clone(client.entity()))
            .collect();
        endpoints.extend(
            self.nodes()
                .iter()
                .map(|node| Arc::clone(node.entity()))
                .filter(|entity| entity.kind() == EntityKind::Block),
        );

        endpoints
            .into_iter()
            .filter(|dest| !dest.is_closed())
            .filter(|dest| loose_contains(&top_most(dest).display_name(), grid))
            .filter(|dest| loose_contains(&dest.display_name(), block))
            .filter(|dest| relations.can_consider_friendly(source.owner_id(), dest.owner_id()))
            .map(|dest| Message::new(content, dest, source, source_block_name.clone(), now))
            .collect()
    }

    /// Drop every registration
    pub fn shutdown(&self) {
        let clients = std::mem::take(&mut *self.clients.write());
        for client in clients.values() {
            client.detach();
        }
        self.nodes.write().clear();
    }
}

/// Case-insensitive containment ignoring whitespace
fn loose_contains(haystack: &str, needle: &str) -> bool {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    squash(haystack).contains(&squash(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::LinkTable;
    use crate::testing::{context, FixedRelations, TestEntity};

    #[test]
    fn test_loose_contains() {
        assert!(loose_contains("Mining Ship 7", "miningship"));
        assert!(loose_contains("Prog Block", "PROG"));
        assert!(loose_contains("anything", ""));
        assert!(!loose_contains("Base", "ship"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let ctx = context();
        let registry = Registry::new();
        let entity = TestEntity::block(1, 1).handle();
        let node = RelayNode::new(Arc::clone(&entity), Box::new(LinkTable::new()), Arc::clone(&ctx));

        registry.add_node(Arc::clone(&node)).unwrap();
        assert_eq!(
            registry.add_node(node),
            Err(RelayError::AlreadyRegistered(1))
        );
        let client = RelayClient::new(entity, None, ctx);
        assert_eq!(
            registry.add_client(client),
            Err(RelayError::AlreadyRegistered(1))
        );
    }

    #[test]
    fn test_get_or_create_part() {
        let ctx = context();
        let registry = Registry::new();
        let node_entity = TestEntity::block(1, 1).handle();
        let node = RelayNode::new(Arc::clone(&node_entity), Box::new(LinkTable::new()), Arc::clone(&ctx));
        registry.add_node(node).unwrap();

        let part = registry.get_or_create_part(&node_entity, None, &ctx).unwrap();
        assert!(matches!(part, RelayPart::Node(_)));

        let prog = TestEntity::block(2, 1).handle();
        let part = registry.get_or_create_part(&prog, None, &ctx).unwrap();
        assert!(matches!(part, RelayPart::Client(_)));
        let again = registry.get_or_create_part(&prog, None, &ctx).unwrap();
        assert!(matches!(again, RelayPart::Client(_)));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_build_messages_matches_names_and_relations() {
        let ctx = context();
        let registry = Registry::new();

        let miner = TestEntity::grid(10, 1).named("Miner Alpha");
        let hauler = TestEntity::grid(20, 1).named("Hauler");
        let pirate = TestEntity::grid(30, 9).named("Miner Pirate");
        let endpoints = [
            TestEntity::block(11, 1).named("Prog Main").attached_to(&miner),
            TestEntity::block(12, 1).named("Cargo Panel").attached_to(&miner),
            TestEntity::block(21, 1).named("Prog Main").attached_to(&hauler),
            TestEntity::block(31, 9).named("Prog Main").attached_to(&pirate),
        ];
        for endpoint in &endpoints {
            registry
                .add_client(RelayClient::new(endpoint.handle(), None, Arc::clone(&ctx)))
                .unwrap();
        }

        let source = TestEntity::block(99, 1).named("Console").handle();
        let messages = registry.build_messages(
            "dock now",
            "miner",
            "prog",
            &source,
            None,
            &FixedRelations::default(),
            GameTime::ZERO,
        );

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].destination_id(), 11);
        assert_eq!(messages[0].content(), "dock now");
    }

    #[test]
    fn test_storages_are_distinct() {
        let ctx = context();
        let registry = Registry::new();
        let links = LinkTable::new();
        for id in 1..=3 {
            let node = RelayNode::new(TestEntity::block(id, 1).handle(), Box::new(links.clone()), Arc::clone(&ctx));
            registry.add_node(node).unwrap();
        }
        links.connect(1, 2);

        ctx.advance_tick();
        for node in registry.nodes() {
            node.update(&registry);
        }
        assert_eq!(registry.storages().len(), 2);
    }
}
