//! Test fixtures
//!
//! In-memory stand-ins for the world boundary, used by unit tests,
//! integration tests and the CLI simulation:
//! - [`TestEntity`]: a grid, block or character with settable state
//! - [`FixedRelations`]: same owner (or explicitly allied owners) is friendly
//! - [`StaticDirectory`]: id lookup over registered entities

use crate::clock::{GameTime, ManualClock};
use crate::config::RelayConfig;
use crate::relay::RelayContext;
use crate::world::{
    Entity, EntityDirectory, EntityHandle, EntityId, EntityKind, OwnerId, Relations, Vec3,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct EntityState {
    name: String,
    position: Vec3,
    velocity: Vec3,
    owner: OwnerId,
    closed: bool,
    working: bool,
    parent: Option<Arc<TestEntityInner>>,
    docked: Vec<Weak<TestEntityInner>>,
}

#[derive(Debug)]
struct TestEntityInner {
    this: Weak<TestEntityInner>,
    id: EntityId,
    kind: EntityKind,
    state: Mutex<EntityState>,
}

/// Mutable entity handle. Clones share state.
#[derive(Debug, Clone)]
pub struct TestEntity {
    inner: Arc<TestEntityInner>,
}

impl TestEntity {
    pub fn new(id: EntityId, owner: OwnerId, kind: EntityKind) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| TestEntityInner {
                this: this.clone(),
                id,
                kind,
                state: Mutex::new(EntityState {
                    name: format!("{} {}", kind, id),
                    position: Vec3::ZERO,
                    velocity: Vec3::ZERO,
                    owner,
                    closed: false,
                    working: true,
                    parent: None,
                    docked: Vec::new(),
                }),
            }),
        }
    }

    pub fn grid(id: EntityId, owner: OwnerId) -> Self {
        Self::new(id, owner, EntityKind::Grid)
    }

    pub fn block(id: EntityId, owner: OwnerId) -> Self {
        Self::new(id, owner, EntityKind::Block)
    }

    pub fn character(id: EntityId, owner: OwnerId) -> Self {
        Self::new(id, owner, EntityKind::Character)
    }

    pub fn named(self, name: &str) -> Self {
        self.inner.state.lock().name = name.to_string();
        self
    }

    /// Mount this entity on `grid`
    pub fn attached_to(self, grid: &TestEntity) -> Self {
        self.inner.state.lock().parent = Some(Arc::clone(&grid.inner));
        self
    }

    /// Dock two top-level entities together
    pub fn dock(&self, other: &TestEntity) {
        self.inner.state.lock().docked.push(Arc::downgrade(&other.inner));
        other.inner.state.lock().docked.push(Arc::downgrade(&self.inner));
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn handle(&self) -> EntityHandle {
        Arc::clone(&self.inner) as EntityHandle
    }

    pub fn set_position(&self, position: Vec3) {
        self.inner.state.lock().position = position;
    }

    pub fn set_velocity(&self, velocity: Vec3) {
        self.inner.state.lock().velocity = velocity;
    }

    pub fn set_owner(&self, owner: OwnerId) {
        self.inner.state.lock().owner = owner;
    }

    pub fn set_working(&self, working: bool) {
        self.inner.state.lock().working = working;
    }

    pub fn close(&self) {
        self.inner.state.lock().closed = true;
    }
}

impl TestEntityInner {
    fn parent(&self) -> Option<Arc<TestEntityInner>> {
        self.state.lock().parent.clone()
    }

    /// Own handle, or the parent's for a mounted entity
    fn top(&self) -> Option<Arc<TestEntityInner>> {
        self.parent().or_else(|| self.this.upgrade())
    }

    fn docked(&self) -> Vec<Arc<TestEntityInner>> {
        self.state
            .lock()
            .docked
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl Entity for TestEntityInner {
    fn id(&self) -> EntityId {
        self.id
    }

    fn display_name(&self) -> String {
        self.state.lock().name.clone()
    }

    fn position(&self) -> Vec3 {
        let (own, parent) = {
            let state = self.state.lock();
            (state.position, state.parent.clone())
        };
        match parent {
            Some(parent) if own == Vec3::ZERO => parent.position(),
            _ => own,
        }
    }

    fn velocity(&self) -> Vec3 {
        self.state.lock().velocity
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn is_working(&self) -> bool {
        let state = self.state.lock();
        state.working && !state.closed
    }

    fn owner_id(&self) -> OwnerId {
        self.state.lock().owner
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn is_persistent(&self) -> bool {
        matches!(self.kind, EntityKind::Grid | EntityKind::Block)
    }

    fn volume(&self) -> f32 {
        match self.kind {
            EntityKind::Grid => 1000.0,
            EntityKind::Block => 15.625,
            _ => 1.0,
        }
    }

    fn top_most(&self) -> Option<EntityHandle> {
        self.parent().map(|parent| parent as EntityHandle)
    }

    fn attached(&self) -> Vec<EntityHandle> {
        let Some(top) = self.top() else {
            return Vec::new();
        };
        let docked = top.docked();
        if docked.is_empty() {
            return Vec::new();
        }
        std::iter::once(top)
            .chain(docked)
            .map(|grid| grid as EntityHandle)
            .collect()
    }

    fn is_attached_to(&self, other: &dyn Entity) -> bool {
        let theirs = other.top_most().map_or(other.id(), |top| top.id());
        match self.top() {
            Some(top) => top.id == theirs || top.docked().iter().any(|grid| grid.id == theirs),
            None => self.id == theirs,
        }
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

/// Owners are friendly with themselves and with explicitly allied owners
#[derive(Debug, Clone, Default)]
pub struct FixedRelations {
    allies: HashSet<(OwnerId, OwnerId)>,
}

impl FixedRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allied(mut self, a: OwnerId, b: OwnerId) -> Self {
        self.allies.insert((a, b));
        self.allies.insert((b, a));
        self
    }
}

impl Relations for FixedRelations {
    fn can_consider_friendly(&self, a: OwnerId, b: OwnerId) -> bool {
        a == b || self.allies.contains(&(a, b))
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Entity lookup backed by a map. Clones share the map.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entities: Arc<RwLock<HashMap<EntityId, EntityHandle>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity: &TestEntity) {
        self.insert(entity.handle());
    }

    pub fn insert(&self, entity: EntityHandle) {
        self.entities.write().insert(entity.id(), entity);
    }

    pub fn remove(&self, id: EntityId) -> Option<EntityHandle> {
        self.entities.write().remove(&id)
    }
}

impl EntityDirectory for StaticDirectory {
    fn entity(&self, id: EntityId) -> Option<EntityHandle> {
        self.entities.read().get(&id).cloned()
    }
}

// ============================================================================
// CONTEXTS
// ============================================================================

/// Context with default config, a manual clock at zero and `FixedRelations`
pub fn context() -> Arc<RelayContext> {
    context_with(RelayConfig::default()).1
}

/// Context with `config`, returning the clock so tests can move time
pub fn context_with(config: RelayConfig) -> (Arc<ManualClock>, Arc<RelayContext>) {
    let clock = Arc::new(ManualClock::new(GameTime::ZERO));
    let ctx = Arc::new(RelayContext::new(
        config,
        Arc::clone(&clock) as Arc<dyn crate::clock::Clock>,
        Arc::new(FixedRelations::new()),
    ));
    (clock, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::top_most;

    #[test]
    fn test_block_reports_grid_as_top_most() {
        let grid = TestEntity::grid(1, 1).named("Carrier");
        grid.set_position(Vec3::new(5.0, 0.0, 0.0));
        let block = TestEntity::block(2, 1).attached_to(&grid);

        let top = top_most(&block.handle());
        assert_eq!(top.id(), 1);
        assert_eq!(top.display_name(), "Carrier");
        assert_eq!(block.handle().position(), Vec3::new(5.0, 0.0, 0.0));
        assert!(top_most(&grid.handle()).top_most().is_none());
    }

    #[test]
    fn test_attachment_through_docking() {
        let a = TestEntity::grid(1, 1);
        let b = TestEntity::grid(2, 1);
        let on_a = TestEntity::block(10, 1).attached_to(&a);
        let on_b = TestEntity::block(20, 1).attached_to(&b);
        let other = TestEntity::block(30, 1);

        assert!(on_a.handle().is_attached_to(a.handle().as_ref()));
        assert!(!on_a.handle().is_attached_to(on_b.handle().as_ref()));
        assert!(on_a.handle().attached().is_empty());

        a.dock(&b);
        assert!(on_a.handle().is_attached_to(on_b.handle().as_ref()));
        assert!(!on_a.handle().is_attached_to(other.handle().as_ref()));
        let ids: Vec<_> = on_a.handle().attached().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_fixed_relations() {
        let relations = FixedRelations::new().allied(1, 2);
        assert!(relations.can_consider_friendly(1, 1));
        assert!(relations.can_consider_friendly(2, 1));
        assert!(!relations.can_consider_friendly(1, 3));
        assert!(relations.can_consider_hostile(1, 3));
    }

    #[test]
    fn test_static_directory_shares_registrations() {
        let directory = StaticDirectory::new();
        let view = directory.clone();
        directory.register(&TestEntity::grid(7, 1));
        assert!(view.entity(7).is_some());
        assert!(view.remove(7).is_some());
        assert!(directory.entity(7).is_none());
    }
}
