// Shared state of one relay network: config, time, relations and counters

use crate::clock::{Clock, GameTime};
use crate::config::RelayConfig;
use crate::world::Relations;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything nodes, storages and clients of one network have in common.
///
/// Passed explicitly at construction; there is no process-wide instance.
pub struct RelayContext {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    relations: Arc<dyn Relations>,
    ticks: AtomicU64,
    storage_ids: AtomicU64,
    search_ids: AtomicU64,
}

impl RelayContext {
    /// Config is expected to be validated by the caller.
    pub fn new(config: RelayConfig, clock: Arc<dyn Clock>, relations: Arc<dyn Relations>) -> Self {
        Self {
            config,
            clock,
            relations,
            ticks: AtomicU64::new(0),
            storage_ids: AtomicU64::new(0),
            search_ids: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn now(&self) -> GameTime {
        self.clock.now()
    }

    pub fn relations(&self) -> &dyn Relations {
        self.relations.as_ref()
    }

    /// Scheduler ticks elapsed
    pub fn tick(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Advance the tick counter, returning the new tick
    pub fn advance_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn next_storage_id(&self) -> u64 {
        self.storage_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fresh id for one reachability search. Never zero, so a node that was
    /// never visited can't match.
    pub(crate) fn next_search_id(&self) -> u64 {
        self.search_ids.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayContext")
            .field("config", &self.config)
            .field("now", &self.clock.now())
            .field("tick", &self.tick())
            .finish()
    }
}
