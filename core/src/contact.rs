//! Contact records
//!
//! A `ContactRecord` is the best known information about one detected entity:
//! where it was, how fast it was moving and when it was last seen doing
//! something interesting (broadcasting, running a radar, running a jammer).
//!
//! Records are immutable. Newer information is folded in with
//! [`ContactRecord::update`], which builds a fresh record taking each
//! timestamped field independently from whichever side is newer.

use crate::clock::GameTime;
use crate::store::snapshot::LastSeenSnapshot;
use crate::world::{EntityHandle, EntityId, EntityKind, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How an entity was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectedBy(u8);

impl DetectedBy {
    pub const NONE: DetectedBy = DetectedBy(0);
    /// Entity was broadcasting its position
    pub const BROADCASTING: DetectedBy = DetectedBy(1 << 1);
    /// Entity's radar was detected
    pub const HAS_RADAR: DetectedBy = DetectedBy(1 << 2);
    /// Entity's jammer was detected
    pub const HAS_JAMMER: DetectedBy = DetectedBy(1 << 3);
    /// Entity was detected by radar
    pub const BY_RADAR: DetectedBy = DetectedBy(1 << 4);

    pub fn contains(self, other: DetectedBy) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for DetectedBy {
    type Output = DetectedBy;

    fn bitor(self, rhs: DetectedBy) -> DetectedBy {
        DetectedBy(self.0 | rhs.0)
    }
}

/// Information available when an entity has been scanned by radar or is
/// sending data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadarInfo {
    pub detected_at: GameTime,
    /// Signature volume in cubic metres
    pub volume: f32,
}

impl RadarInfo {
    pub fn of(entity: &EntityHandle, now: GameTime) -> Self {
        Self {
            detected_at: now,
            volume: entity.volume(),
        }
    }
}

/// Immutable snapshot of a detected entity.
///
/// Validity is latched: once a record reports invalid it stays invalid.
pub struct ContactRecord {
    entity: EntityHandle,
    entity_id: EntityId,
    kind: EntityKind,
    last_seen_at: GameTime,
    last_known_position: Vec3,
    last_known_velocity: Vec3,
    last_broadcast: Option<GameTime>,
    last_radar: Option<GameTime>,
    last_jam: Option<GameTime>,
    radar_info: Option<RadarInfo>,
    valid: AtomicBool,
}

impl ContactRecord {
    /// Record an observation of `entity` made at `now`.
    pub fn observe(entity: &EntityHandle, now: GameTime, detected: DetectedBy) -> Self {
        let stamp = |flag| detected.contains(flag).then_some(now);
        Self {
            entity: Arc::clone(entity),
            entity_id: entity.id(),
            kind: entity.kind(),
            last_seen_at: now,
            last_known_position: entity.position(),
            last_known_velocity: entity.velocity(),
            last_broadcast: stamp(DetectedBy::BROADCASTING),
            last_radar: stamp(DetectedBy::HAS_RADAR),
            last_jam: stamp(DetectedBy::HAS_JAMMER),
            radar_info: None,
            valid: AtomicBool::new(true),
        }
    }

    /// Record an observation that also carries radar metadata.
    pub fn observe_with_radar(entity: &EntityHandle, now: GameTime, detected: DetectedBy) -> Self {
        Self::observe(entity, now, detected).with_radar_info(RadarInfo::of(entity, now))
    }

    pub fn with_radar_info(mut self, info: RadarInfo) -> Self {
        self.radar_info = Some(info);
        self
    }

    /// Rebuild a persisted record against the live entity.
    pub(crate) fn from_snapshot(snapshot: &LastSeenSnapshot, entity: EntityHandle) -> Self {
        Self {
            entity_id: snapshot.entity_id,
            kind: entity.kind(),
            entity,
            last_seen_at: snapshot.last_seen_at,
            last_known_position: snapshot.position,
            last_known_velocity: snapshot.velocity,
            last_broadcast: snapshot.last_broadcast,
            last_radar: snapshot.last_radar,
            last_jam: snapshot.last_jam,
            radar_info: snapshot.radar_info,
            valid: AtomicBool::new(true),
        }
    }

    pub(crate) fn to_snapshot(&self) -> LastSeenSnapshot {
        LastSeenSnapshot {
            entity_id: self.entity_id,
            position: self.last_known_position,
            velocity: self.last_known_velocity,
            last_seen_at: self.last_seen_at,
            last_broadcast: self.last_broadcast,
            last_radar: self.last_radar,
            last_jam: self.last_jam,
            radar_info: self.radar_info,
        }
    }

    /// Combine two records for the same entity.
    ///
    /// Position, velocity and the observation instant come from the record
    /// seen most recently (`existing` on a tie). Each "last active" instant
    /// and the radar info are taken from whichever side is newer for that
    /// field alone.
    fn merged(incoming: &ContactRecord, existing: &ContactRecord) -> Self {
        debug_assert_eq!(incoming.entity_id, existing.entity_id);

        let newer = if incoming.last_seen_at > existing.last_seen_at {
            incoming
        } else {
            existing
        };
        let radar_info = if radar_time(incoming) > radar_time(existing) {
            incoming.radar_info
        } else {
            existing.radar_info
        };

        Self {
            entity: Arc::clone(&newer.entity),
            entity_id: newer.entity_id,
            kind: newer.kind,
            last_seen_at: newer.last_seen_at,
            last_known_position: newer.last_known_position,
            last_known_velocity: newer.last_known_velocity,
            last_broadcast: incoming.last_broadcast.max(existing.last_broadcast),
            last_radar: incoming.last_radar.max(existing.last_radar),
            last_jam: incoming.last_jam.max(existing.last_jam),
            radar_info,
            valid: AtomicBool::new(true),
        }
    }

    /// True if this record carries anything newer than `existing`.
    pub fn advances(&self, existing: &ContactRecord) -> bool {
        self.last_seen_at > existing.last_seen_at
            || self.last_broadcast > existing.last_broadcast
            || self.last_jam > existing.last_jam
            || self.last_radar > existing.last_radar
            || radar_time(self) > radar_time(existing)
    }

    /// If this record has newer information, returns the merge of this
    /// record into `existing`. `None` means `existing` is already up to date.
    pub fn update(&self, existing: &ContactRecord) -> Option<ContactRecord> {
        self.advances(existing)
            .then(|| ContactRecord::merged(self, existing))
    }

    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn last_seen_at(&self) -> GameTime {
        self.last_seen_at
    }

    pub fn last_known_position(&self) -> Vec3 {
        self.last_known_position
    }

    pub fn last_known_velocity(&self) -> Vec3 {
        self.last_known_velocity
    }

    pub fn last_broadcast(&self) -> Option<GameTime> {
        self.last_broadcast
    }

    pub fn last_radar(&self) -> Option<GameTime> {
        self.last_radar
    }

    pub fn last_jam(&self) -> Option<GameTime> {
        self.last_jam
    }

    pub fn radar_info(&self) -> Option<RadarInfo> {
        self.radar_info
    }

    /// A record is valid while its entity is in the world and it is younger
    /// than `lifetime`. Once invalid, always invalid.
    pub fn is_valid(&self, now: GameTime, lifetime: Duration) -> bool {
        if !self.valid.load(Ordering::Acquire) {
            return false;
        }
        if self.entity.is_closed() || now.saturating_since(self.last_seen_at) > lifetime {
            self.valid.store(false, Ordering::Release);
            return false;
        }
        true
    }

    pub fn time_since_seen(&self, now: GameTime) -> Duration {
        now.saturating_since(self.last_seen_at)
    }

    /// True if the entity was detected within `window`
    pub fn is_recent(&self, now: GameTime, window: Duration) -> bool {
        self.time_since_seen(now) < window
    }

    /// True if the entity was seen broadcasting within `window`
    pub fn is_recent_broadcast(&self, now: GameTime, window: Duration) -> bool {
        is_within(self.last_broadcast, now, window)
    }

    /// True if a radar was seen on the entity within `window`
    pub fn is_recent_radar(&self, now: GameTime, window: Duration) -> bool {
        is_within(self.last_radar, now, window)
    }

    /// True if a jammer was seen on the entity within `window`
    pub fn is_recent_jam(&self, now: GameTime, window: Duration) -> bool {
        is_within(self.last_jam, now, window)
    }

    pub fn radar_info_is_recent(&self, now: GameTime, window: Duration) -> bool {
        is_within(radar_time(self), now, window)
    }

    /// Extrapolated position: `last position + last velocity * elapsed`
    pub fn predict_position(&self, now: GameTime) -> Vec3 {
        let elapsed = self.time_since_seen(now).as_secs_f64();
        self.last_known_position + self.last_known_velocity * elapsed
    }

    /// The entity's live position when it was seen within `recent`,
    /// otherwise the predicted position.
    pub fn position(&self, now: GameTime, recent: Duration) -> Vec3 {
        if !self.entity.is_closed() && self.is_recent(now, recent) {
            self.entity.position()
        } else {
            self.predict_position(now)
        }
    }

    /// The entity's live velocity when it was seen within `recent`,
    /// otherwise the last known velocity.
    pub fn velocity(&self, now: GameTime, recent: Duration) -> Vec3 {
        if !self.entity.is_closed() && self.is_recent(now, recent) {
            self.entity.velocity()
        } else {
            self.last_known_velocity
        }
    }

    /// Name to show for an entity that may not want to be identified.
    /// Only entities that broadcast recently reveal their display name.
    pub fn hostile_name(&self, now: GameTime, recent: Duration) -> String {
        match self.kind {
            EntityKind::Character => {
                let name = self.entity.display_name();
                if name.is_empty() {
                    "Creature".to_string()
                } else {
                    name
                }
            }
            EntityKind::Grid if self.is_recent_broadcast(now, recent) => {
                self.entity.display_name()
            }
            kind => kind.to_string(),
        }
    }
}

impl fmt::Debug for ContactRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactRecord")
            .field("entity_id", &self.entity_id)
            .field("kind", &self.kind)
            .field("last_seen_at", &self.last_seen_at)
            .field("position", &self.last_known_position)
            .field("last_broadcast", &self.last_broadcast)
            .field("last_radar", &self.last_radar)
            .field("last_jam", &self.last_jam)
            .field("radar_info", &self.radar_info)
            .finish()
    }
}

fn radar_time(record: &ContactRecord) -> Option<GameTime> {
    record.radar_info.map(|info| info.detected_at)
}

fn is_within(stamp: Option<GameTime>, now: GameTime, window: Duration) -> bool {
    stamp.is_some_and(|at| now.saturating_since(at) < window)
}
