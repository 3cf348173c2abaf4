//! Link capabilities
//!
//! A node does not know how its links are made. It holds one [`Capability`]
//! chosen when it is built and asks it, once per tick and per candidate,
//! what kind of communication is possible:
//! - [`Attachment`]: mechanically connected entities always talk both ways
//! - [`Laser`]: two lasers locked on each other talk both ways
//! - [`Radio`]: range and broadcast/receive flags decide the direction
//! - [`Chain`]: the first component that finds a link wins
//! - [`LinkTable`]: links set explicitly, for harnesses and scripted runs

use super::node::RelayNode;
use super::CommunicationType;
use crate::world::{EntityId, LinkError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// How a node finds out whether it can reach another node.
pub trait Capability: Send + Sync {
    /// Classify communication from `from` (the node holding this capability)
    /// to `to`. An error means the pair could not be evaluated this tick and
    /// is treated as no communication.
    fn try_connect(&self, from: &RelayNode, to: &RelayNode)
        -> Result<CommunicationType, LinkError>;

    /// `to` can detect `from`'s position without sharing any data.
    fn can_broadcast_position_to(&self, _from: &RelayNode, _to: &RelayNode) -> bool {
        false
    }

    fn radio(&self) -> Option<&Radio> {
        None
    }

    fn laser(&self) -> Option<&Laser> {
        None
    }
}

fn ensure_present(node: &RelayNode) -> Result<(), LinkError> {
    if node.entity().is_closed() {
        Err(LinkError::EntityGone(node.id()))
    } else {
        Ok(())
    }
}

// ============================================================================
// ATTACHMENT
// ============================================================================

/// Mechanical connection. Power state is ignored so a storage does not split
/// when a ship powers down.
#[derive(Debug, Default, Clone, Copy)]
pub struct Attachment;

impl Capability for Attachment {
    fn try_connect(
        &self,
        from: &RelayNode,
        to: &RelayNode,
    ) -> Result<CommunicationType, LinkError> {
        ensure_present(to)?;
        if from.entity().is_attached_to(to.entity().as_ref()) {
            Ok(CommunicationType::TwoWay)
        } else {
            Ok(CommunicationType::None)
        }
    }
}

// ============================================================================
// LASER
// ============================================================================

/// Point-to-point link. Connected only while both ends target each other.
#[derive(Debug, Default)]
pub struct Laser {
    target: RwLock<Option<EntityId>>,
}

impl Laser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aim_at(&self, target: EntityId) {
        *self.target.write() = Some(target);
    }

    pub fn release(&self) {
        *self.target.write() = None;
    }

    pub fn target(&self) -> Option<EntityId> {
        *self.target.read()
    }
}

impl Capability for Laser {
    fn try_connect(
        &self,
        from: &RelayNode,
        to: &RelayNode,
    ) -> Result<CommunicationType, LinkError> {
        ensure_present(to)?;
        let locked = to.capability().laser().is_some_and(|other| {
            self.target() == Some(to.id()) && other.target() == Some(from.id())
        });
        Ok(if locked {
            CommunicationType::TwoWay
        } else {
            CommunicationType::None
        })
    }

    fn laser(&self) -> Option<&Laser> {
        Some(self)
    }
}

// ============================================================================
// RADIO
// ============================================================================

/// Radio state, read every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioSettings {
    /// Functioning (powered, not damaged)
    pub working: bool,
    /// Capable of receiving transmissions
    pub can_receive: bool,
    /// Broadcasting data is enabled
    pub broadcast_data: bool,
    /// Broadcasting position is enabled
    pub broadcast_position: bool,
    /// Broadcast radius in metres
    pub radius: f64,
}

impl RadioSettings {
    /// Antenna that receives and broadcasts both data and position
    pub fn antenna(radius: f64) -> Self {
        Self {
            working: true,
            can_receive: true,
            broadcast_data: true,
            broadcast_position: true,
            radius,
        }
    }

    /// Beacon: broadcasts its position only
    pub fn beacon(radius: f64) -> Self {
        Self {
            working: true,
            can_receive: false,
            broadcast_data: false,
            broadcast_position: true,
            radius,
        }
    }

    /// Receive-only radio
    pub fn receiver() -> Self {
        Self {
            working: true,
            can_receive: true,
            broadcast_data: false,
            broadcast_position: false,
            radius: 0.0,
        }
    }
}

/// Sphere-range radio
pub struct Radio {
    settings: RwLock<RadioSettings>,
}

impl Radio {
    pub fn new(settings: RadioSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> RadioSettings {
        *self.settings.read()
    }

    pub fn update(&self, change: impl FnOnce(&mut RadioSettings)) {
        change(&mut self.settings.write());
    }

    pub fn set_radius(&self, radius: f64) {
        self.update(|s| s.radius = radius);
    }

    pub fn set_broadcasting(&self, enabled: bool) {
        self.update(|s| {
            s.broadcast_data = enabled;
            s.broadcast_position = enabled;
        });
    }

    /// Link between two radios `distance_squared` apart, seen from `this`.
    fn link(this: RadioSettings, other: RadioSettings, distance_squared: f64) -> CommunicationType {
        if !this.working || !other.working {
            return CommunicationType::None;
        }
        if !this.broadcast_data || !other.can_receive {
            return CommunicationType::None;
        }
        if distance_squared > this.radius * this.radius {
            return CommunicationType::None;
        }
        if !this.can_receive || !other.broadcast_data {
            return CommunicationType::OneWay;
        }
        if distance_squared > other.radius * other.radius {
            return CommunicationType::OneWay;
        }
        CommunicationType::TwoWay
    }
}

impl fmt::Debug for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Radio").field(&self.settings()).finish()
    }
}

fn radio_pair(from: &RelayNode, to: &RelayNode) -> Option<(RadioSettings, RadioSettings, f64)> {
    let this = from.capability().radio()?.settings();
    let other = to.capability().radio()?.settings();
    let working = |node: &RelayNode, s: RadioSettings| s.working && node.entity().is_working();
    let this = RadioSettings {
        working: working(from, this),
        ..this
    };
    let other = RadioSettings {
        working: working(to, other),
        ..other
    };
    let distance_squared = from
        .entity()
        .position()
        .distance_squared(to.entity().position());
    Some((this, other, distance_squared))
}

impl Capability for Radio {
    fn try_connect(
        &self,
        from: &RelayNode,
        to: &RelayNode,
    ) -> Result<CommunicationType, LinkError> {
        ensure_present(to)?;
        Ok(radio_pair(from, to)
            .map(|(this, other, d2)| Radio::link(this, other, d2))
            .unwrap_or_default())
    }

    fn can_broadcast_position_to(&self, from: &RelayNode, to: &RelayNode) -> bool {
        radio_pair(from, to).is_some_and(|(this, other, d2)| {
            this.working
                && other.working
                && this.broadcast_position
                && other.can_receive
                && d2 <= this.radius * this.radius
        })
    }

    fn radio(&self) -> Option<&Radio> {
        Some(self)
    }
}

// ============================================================================
// CHAIN
// ============================================================================

/// Several capabilities tested in order
#[derive(Default)]
pub struct Chain {
    links: Vec<Box<dyn Capability>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, link: impl Capability + 'static) -> Self {
        self.links.push(Box::new(link));
        self
    }

    /// The usual block setup: attachment first, then laser, then radio.
    pub fn block(laser: Option<Laser>, radio: Option<Radio>) -> Self {
        let mut chain = Chain::new().with(Attachment);
        if let Some(laser) = laser {
            chain = chain.with(laser);
        }
        if let Some(radio) = radio {
            chain = chain.with(radio);
        }
        chain
    }
}

impl Capability for Chain {
    fn try_connect(
        &self,
        from: &RelayNode,
        to: &RelayNode,
    ) -> Result<CommunicationType, LinkError> {
        for link in &self.links {
            let result = link.try_connect(from, to)?;
            if result != CommunicationType::None {
                return Ok(result);
            }
        }
        Ok(CommunicationType::None)
    }

    fn can_broadcast_position_to(&self, from: &RelayNode, to: &RelayNode) -> bool {
        self.links
            .iter()
            .any(|link| link.can_broadcast_position_to(from, to))
    }

    fn radio(&self) -> Option<&Radio> {
        self.links.iter().find_map(|link| link.radio())
    }

    fn laser(&self) -> Option<&Laser> {
        self.links.iter().find_map(|link| link.laser())
    }
}

// ============================================================================
// LINK TABLE
// ============================================================================

/// Explicit directed link table.
///
/// Cloning shares the table, so one table can drive every node of a
/// scenario.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: Arc<RwLock<HashMap<(EntityId, EntityId), CommunicationType>>>,
    position_only: Arc<RwLock<HashSet<(EntityId, EntityId)>>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link seen from `from` towards `to`
    pub fn set(&self, from: EntityId, to: EntityId, kind: CommunicationType) {
        let mut links = self.links.write();
        if kind == CommunicationType::None {
            links.remove(&(from, to));
        } else {
            links.insert((from, to), kind);
        }
    }

    pub fn connect(&self, a: EntityId, b: EntityId) {
        self.set(a, b, CommunicationType::TwoWay);
        self.set(b, a, CommunicationType::TwoWay);
    }

    /// `from` pushes to `to`; `to` can't answer
    pub fn connect_one_way(&self, from: EntityId, to: EntityId) {
        self.set(from, to, CommunicationType::OneWay);
        self.set(to, from, CommunicationType::None);
    }

    pub fn disconnect(&self, a: EntityId, b: EntityId) {
        self.set(a, b, CommunicationType::None);
        self.set(b, a, CommunicationType::None);
    }

    /// `to` learns `from`'s position but nothing else
    pub fn broadcast_position(&self, from: EntityId, to: EntityId, enabled: bool) {
        let mut position_only = self.position_only.write();
        if enabled {
            position_only.insert((from, to));
        } else {
            position_only.remove(&(from, to));
        }
    }

    pub fn get(&self, from: EntityId, to: EntityId) -> CommunicationType {
        self.links
            .read()
            .get(&(from, to))
            .copied()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.links.write().clear();
        self.position_only.write().clear();
    }
}

impl Capability for LinkTable {
    fn try_connect(
        &self,
        from: &RelayNode,
        to: &RelayNode,
    ) -> Result<CommunicationType, LinkError> {
        ensure_present(to)?;
        Ok(self.get(from.id(), to.id()))
    }

    fn can_broadcast_position_to(&self, from: &RelayNode, to: &RelayNode) -> bool {
        self.position_only.read().contains(&(from.id(), to.id()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
