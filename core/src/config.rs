//! Relay tuning
//!
//! Settings that control how long relayed data lives and how often the
//! network cleans up after itself:
//! - Contact record and message lifetimes
//! - Recency windows used for position prediction
//! - Per-storage message capacity
//! - Sweep and client refresh intervals (in scheduler ticks)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur during config validation
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Invalid contact lifetime: must be > 0 seconds")]
    InvalidContactLifetime,

    #[error("Invalid message lifetime: must be > 0 seconds")]
    InvalidMessageLifetime,

    #[error("Invalid message capacity: must be > 0")]
    InvalidMessageCapacity,

    #[error("Invalid interval for {0}: must be > 0 ticks")]
    InvalidInterval(&'static str),

    #[error("Recent window ({recent}s) must be shorter than contact lifetime ({lifetime}s)")]
    RecentWindowTooLong { recent: u64, lifetime: u64 },
}

// ============================================================================
// RELAY CONFIG
// ============================================================================

/// Tunable parameters of the relay network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// A contact record older than this is invalid
    pub contact_lifetime_secs: u64,

    /// Within this window the live entity is queried instead of predicting
    pub recent_window_secs: u64,

    /// Radar info younger than this is not refreshed by the node's own
    /// self-report
    pub very_recent_radar_millis: u64,

    /// A message older than this is invalid
    pub message_lifetime_secs: u64,

    /// Undeliverable messages held per storage before new ones are dropped
    pub message_capacity: usize,

    /// Ticks between forced sweeps of a storage
    pub clean_interval_ticks: u64,

    /// Ticks a client keeps its chosen node before re-resolving
    pub client_refresh_ticks: u64,

    /// Ticks a restored contact waits for its entity before being dropped
    pub restore_retry_ticks: u64,
}

impl RelayConfig {
    /// Validate config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contact_lifetime_secs == 0 {
            return Err(ConfigError::InvalidContactLifetime);
        }

        if self.message_lifetime_secs == 0 {
            return Err(ConfigError::InvalidMessageLifetime);
        }

        if self.message_capacity == 0 {
            return Err(ConfigError::InvalidMessageCapacity);
        }

        if self.clean_interval_ticks == 0 {
            return Err(ConfigError::InvalidInterval("clean_interval_ticks"));
        }

        if self.client_refresh_ticks == 0 {
            return Err(ConfigError::InvalidInterval("client_refresh_ticks"));
        }

        if self.recent_window_secs >= self.contact_lifetime_secs {
            return Err(ConfigError::RecentWindowTooLong {
                recent: self.recent_window_secs,
                lifetime: self.contact_lifetime_secs,
            });
        }

        Ok(())
    }

    pub fn contact_lifetime(&self) -> Duration {
        Duration::from_secs(self.contact_lifetime_secs)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }

    pub fn very_recent_radar(&self) -> Duration {
        Duration::from_millis(self.very_recent_radar_millis)
    }

    pub fn message_lifetime(&self) -> Duration {
        Duration::from_secs(self.message_lifetime_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            contact_lifetime_secs: 3600,
            recent_window_secs: 10,
            very_recent_radar_millis: 833,
            message_lifetime_secs: 3600,
            message_capacity: 100,
            clean_interval_ticks: 60,
            client_refresh_ticks: 10,
            restore_retry_ticks: 60,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
