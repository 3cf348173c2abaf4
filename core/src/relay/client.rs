//! Relay client
//!
//! An endpoint that uses the network without joining the graph. A client
//! borrows the storage of one node attached to the same grid and re-checks
//! its choice every few ticks.

use super::context::RelayContext;
use super::node::RelayNode;
use super::registry::Registry;
use super::storage::{Delivery, MessageHandler, RelayStorage};
use crate::message::{parse_send, Message, ParseError};
use crate::world::{EntityHandle, EntityId, OwnerId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

#[derive(Default)]
struct ClientState {
    node: Option<Weak<RelayNode>>,
    next_node_set: u64,
    storage: Option<Arc<RelayStorage>>,
}

/// Partial participant in a network; only talks to a single node
pub struct RelayClient {
    entity: EntityHandle,
    ctx: Arc<RelayContext>,
    handler: Option<MessageHandler>,
    state: Mutex<ClientState>,
}

impl RelayClient {
    pub fn new(
        entity: EntityHandle,
        handler: Option<MessageHandler>,
        ctx: Arc<RelayContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity,
            ctx,
            handler,
            state: Mutex::new(ClientState::default()),
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

    fn is_connected(&self, node: &RelayNode) -> bool {
        let block = node.entity();
        !block.is_closed()
            && block.is_working()
            && self
                .ctx
                .relations()
                .can_consider_friendly(self.owner_id(), block.owner_id())
            && self.entity.is_attached_to(block.as_ref())
    }

    /// The node this client talks through. Cached for a few ticks.
    pub fn node(&self, registry: &Registry) -> Option<Arc<RelayNode>> {
        let tick = self.ctx.tick();
        let mut state = self.state.lock();
        if tick < state.next_node_set {
            return state.node.as_ref().and_then(Weak::upgrade);
        }
        state.next_node_set = tick + self.ctx.config().client_refresh_ticks;

        let current = state
            .node
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|node| registry.contains_node(node.id()) && self.is_connected(node));
        let node = current.or_else(|| {
            registry
                .nodes()
                .into_iter()
                .find(|node| self.is_connected(node))
        });

        state.node = node.as_ref().map(Arc::downgrade);
        node
    }

    /// The storage this client is connected to, if any. When the storage
    /// changes the message handler moves with it.
    pub fn storage(&self, registry: &Registry) -> Option<Arc<RelayStorage>> {
        let storage = self.node(registry).and_then(|node| node.storage());

        let previous = {
            let mut state = self.state.lock();
            let unchanged = match (&state.storage, &storage) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return storage;
            }
            std::mem::replace(&mut state.storage, storage.clone())
        };

        debug!(
            "Client {} storage changed: {:?} => {:?}",
            self.id(),
            previous.as_ref().map(|s| s.id()),
            storage.as_ref().map(|s| s.id())
        );

        if let Some(handler) = &self.handler {
            if let Some(previous) = &previous {
                previous.remove_message_handler(self.id());
            }
            if let Some(storage) = &storage {
                if let Err(e) = storage.add_message_handler(self.id(), Arc::clone(handler)) {
                    error!("Client {} could not register its message handler: {}", self.id(), e);
                }
            }
        }
        storage
    }

    /// Send `content` to every endpoint matching `grid` and `block`.
    ///
    /// Returns the number of messages sent, or `None` when the client has no
    /// storage to send through.
    pub fn send_message(
        &self,
        registry: &Registry,
        grid: &str,
        block: &str,
        content: &str,
        source_block_name: Option<String>,
    ) -> Option<usize> {
        let storage = self.storage(registry)?;
        let messages = registry.build_messages(
            content,
            grid,
            block,
            &self.entity,
            source_block_name,
            self.ctx.relations(),
            self.ctx.now(),
        );

        let count = messages.len();
        for message in messages {
            if storage.receive_message(message) == Delivery::Dropped {
                debug!("Client {} message was dropped", self.id());
            }
        }
        Some(count)
    }

    /// Send the command embedded in `name`. Returns the name with the
    /// command removed and the number of messages sent.
    pub fn send_from_name(
        &self,
        registry: &Registry,
        name: &str,
    ) -> Result<(String, usize), ParseError> {
        let command = parse_send(name)?;
        let sent = self
            .send_message(
                registry,
                &command.grid,
                &command.block,
                &command.content,
                Some(command.clean_name.clone()),
            )
            .unwrap_or(0);
        Ok((command.clean_name, sent))
    }

    /// Release the handler registration, e.g. before the endpoint is removed
    pub fn detach(&self) {
        let previous = self.state.lock().storage.take();
        if let (Some(storage), Some(_)) = (previous, &self.handler) {
            storage.remove_message_handler(self.id());
        }
    }
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RelayClient")
            .field("id", &self.id())
            .field(
                "node",
                &state.node.as_ref().and_then(Weak::upgrade).map(|n| n.id()),
            )
            .field("storage", &state.storage.as_ref().map(|s| s.id()))
            .finish()
    }
}

/// Shared message sink, for clients that just collect what they receive
pub fn collecting_handler() -> (MessageHandler, Arc<Mutex<Vec<Arc<Message>>>>) {
    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    let handler: MessageHandler = Arc::new(move |message| sink.lock().push(message));
    (handler, inbox)
}

// ============================================================================
// TESTS
// ============================================================================
