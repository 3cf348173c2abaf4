//! World boundary
//!
//! The relay core never inspects game objects directly. Everything it needs
//! to know about the world comes through the traits in this module:
//! - [`Entity`]: position, velocity, lifecycle and ownership of one object
//! - [`Relations`]: whether two owners treat each other as friendly
//! - [`EntityDirectory`]: id → live entity lookup (snapshot restore)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;
use thiserror::Error;

/// Stable id of a world entity
pub type EntityId = i64;

/// Id of the player/faction identity owning an entity
pub type OwnerId = i64;

/// Shared handle to a world entity
pub type EntityHandle = Arc<dyn Entity>;

/// Failure evaluating a link between two nodes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Entity {0} is no longer in the world")]
    EntityGone(EntityId),

    #[error("Link test unavailable: {0}")]
    Unavailable(String),
}

/// Position or velocity in world space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(self, other: Vec3) -> f64 {
        let d = self - other;
        d.x * d.x + d.y * d.y + d.z * d.z
    }

    pub fn length(self) -> f64 {
        self.distance_squared(Vec3::ZERO).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Broad category of a detected entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Grid,
    Block,
    Character,
    Missile,
    Unknown,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grid => write!(f, "Grid"),
            Self::Block => write!(f, "Block"),
            Self::Character => write!(f, "Character"),
            Self::Missile => write!(f, "Missile"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Accessor for one object in the world.
///
/// Implementations must be cheap to query; nodes call these every tick.
pub trait Entity: Send + Sync + fmt::Debug {
    fn id(&self) -> EntityId;

    fn display_name(&self) -> String;

    fn position(&self) -> Vec3;

    fn velocity(&self) -> Vec3 {
        Vec3::ZERO
    }

    /// Closed entities have left the world and never come back.
    fn is_closed(&self) -> bool;

    /// Powered and functional. Defaults to "not closed".
    fn is_working(&self) -> bool {
        !self.is_closed()
    }

    fn owner_id(&self) -> OwnerId;

    fn kind(&self) -> EntityKind;

    /// Block-backed entities survive save/load; characters and missiles
    /// do not.
    fn is_persistent(&self) -> bool {
        false
    }

    /// Radar signature volume in cubic metres
    fn volume(&self) -> f32 {
        0.0
    }

    /// The top-level parent (e.g. the grid of a block). `None` when this
    /// entity is already top-level.
    fn top_most(&self) -> Option<EntityHandle> {
        None
    }

    /// Top-level entities rigidly attached to this one, including its own
    /// top-level parent. Empty means "just the top-level parent".
    fn attached(&self) -> Vec<EntityHandle> {
        Vec::new()
    }

    /// Mechanically connected to `other` (same grid or docked grids).
    fn is_attached_to(&self, other: &dyn Entity) -> bool {
        self.id() == other.id()
    }
}

/// Top-level parent of `entity`, or the entity itself.
pub fn top_most(entity: &EntityHandle) -> EntityHandle {
    entity.top_most().unwrap_or_else(|| Arc::clone(entity))
}

/// Ownership relation query
#[cfg_attr(test, mockall::automock)]
pub trait Relations: Send + Sync {
    fn can_consider_friendly(&self, a: OwnerId, b: OwnerId) -> bool;

    fn can_consider_hostile(&self, a: OwnerId, b: OwnerId) -> bool {
        !self.can_consider_friendly(a, b)
    }
}

/// Lookup of live entities by id
pub trait EntityDirectory: Send + Sync {
    fn entity(&self, id: EntityId) -> Option<EntityHandle>;
}
