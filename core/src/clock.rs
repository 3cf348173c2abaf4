// Simulation clock
//
// Every timestamp in the relay core is a `GameTime`: elapsed simulation time
// since the world started, in milliseconds. Game time survives a save/load, so
// persisted timestamps stay comparable after a restart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Elapsed simulation time in milliseconds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GameTime(u64);

impl GameTime {
    pub const ZERO: GameTime = GameTime(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f32(self) -> f32 {
        self.0 as f32 / 1000.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_since(self, earlier: GameTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for GameTime {
    type Output = GameTime;

    fn add(self, rhs: Duration) -> GameTime {
        GameTime(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl Sub<Duration> for GameTime {
    type Output = GameTime;

    fn sub(self, rhs: Duration) -> GameTime {
        GameTime(self.0.saturating_sub(rhs.as_millis() as u64))
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0 / 1000;
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            total / 3600,
            (total / 60) % 60,
            total % 60,
            self.0 % 1000
        )
    }
}

/// Source of simulation time
pub trait Clock: Send + Sync {
    fn now(&self) -> GameTime;
}

/// Clock advanced explicitly by the caller. Used by tests and by
/// fixed-step simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: GameTime) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, to: GameTime) {
        self.millis.store(to.as_millis(), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> GameTime {
        GameTime(self.millis.load(Ordering::Relaxed))
    }
}

/// Wall-clock driven game time, resuming from `offset` (e.g. the game time
/// stored with the last save).
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
    offset: GameTime,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::resume_from(GameTime::ZERO)
    }

    pub fn resume_from(offset: GameTime) -> Self {
        Self {
            started: Instant::now(),
            offset,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> GameTime {
        self.offset + self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(GameTime::from_secs(5));
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), GameTime::from_millis(6500));

        clock.set(GameTime::ZERO);
        assert_eq!(clock.now(), GameTime::ZERO);
    }

    #[test]
    fn test_saturating_since() {
        let earlier = GameTime::from_secs(10);
        let later = GameTime::from_secs(25);

        assert_eq!(later.saturating_since(earlier), Duration::from_secs(15));
        assert_eq!(earlier.saturating_since(later), Duration::ZERO);
    }

    #[test]
    fn test_display_format() {
        let t = GameTime::from_millis(3_723_045);
        assert_eq!(t.to_string(), "01:02:03.045");
    }

    #[test]
    fn test_system_clock_resumes_from_offset() {
        let clock = SystemClock::resume_from(GameTime::from_secs(100));
        assert!(clock.now() >= GameTime::from_secs(100));
    }
}
