// Configuration management for the relaynet CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/relaynet/config.json
// - Linux: ~/.config/relaynet/config.json
// - Windows: %APPDATA%\relaynet\config.json

use anyhow::{Context, Result};
use relaynet_core::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay network tuning
    pub relay: RelayConfig,

    /// Snapshot database; defaults to the data directory
    pub snapshot_path: Option<String>,

    /// Write logs to daily files in this directory instead of stderr
    pub log_dir: Option<String>,

    /// Random-walk simulation settings
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ships in the simulation
    pub ships: usize,

    /// Factions the ships are split between
    pub factions: usize,

    /// Antenna range in metres
    pub radius: f64,

    /// Side of the cube ships start in, in metres
    pub area: f64,

    /// Largest step a ship makes per tick, in metres
    pub step: f64,

    /// Wall-clock interval between ticks
    pub tick_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            snapshot_path: None,
            log_dir: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ships: 12,
            factions: 2,
            radius: 5_000.0,
            area: 20_000.0,
            step: 400.0,
            tick_millis: 100,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("relaynet");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("relaynet");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config.relay.validate().context("Invalid relay settings")?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Snapshot database location
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        match &self.snapshot_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("snapshots")),
        }
    }

    /// Set a config value. Does not save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let relay = &mut self.relay;
        let sim = &mut self.simulation;
        match key {
            "contact_lifetime_secs" => relay.contact_lifetime_secs = parse(key, value)?,
            "recent_window_secs" => relay.recent_window_secs = parse(key, value)?,
            "very_recent_radar_millis" => relay.very_recent_radar_millis = parse(key, value)?,
            "message_lifetime_secs" => relay.message_lifetime_secs = parse(key, value)?,
            "message_capacity" => relay.message_capacity = parse(key, value)?,
            "clean_interval_ticks" => relay.clean_interval_ticks = parse(key, value)?,
            "client_refresh_ticks" => relay.client_refresh_ticks = parse(key, value)?,
            "restore_retry_ticks" => relay.restore_retry_ticks = parse(key, value)?,
            "snapshot_path" => self.snapshot_path = optional(value),
            "log_dir" => self.log_dir = optional(value),
            "sim.ships" => sim.ships = parse(key, value)?,
            "sim.factions" => sim.factions = parse(key, value)?,
            "sim.radius" => sim.radius = parse(key, value)?,
            "sim.area" => sim.area = parse(key, value)?,
            "sim.step" => sim.step = parse(key, value)?,
            "sim.tick_millis" => sim.tick_millis = parse(key, value)?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.relay.validate().context("Invalid relay settings")?;
        if self.simulation.factions == 0 {
            anyhow::bail!("sim.factions must be at least 1");
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let relay = &self.relay;
        let sim = &self.simulation;
        let unset = || "(auto)".to_string();
        vec![
            ("contact_lifetime_secs".into(), relay.contact_lifetime_secs.to_string()),
            ("recent_window_secs".into(), relay.recent_window_secs.to_string()),
            ("very_recent_radar_millis".into(), relay.very_recent_radar_millis.to_string()),
            ("message_lifetime_secs".into(), relay.message_lifetime_secs.to_string()),
            ("message_capacity".into(), relay.message_capacity.to_string()),
            ("clean_interval_ticks".into(), relay.clean_interval_ticks.to_string()),
            ("client_refresh_ticks".into(), relay.client_refresh_ticks.to_string()),
            ("restore_retry_ticks".into(), relay.restore_retry_ticks.to_string()),
            ("snapshot_path".into(), self.snapshot_path.clone().unwrap_or_else(unset)),
            ("log_dir".into(), self.log_dir.clone().unwrap_or_else(unset)),
            ("sim.ships".into(), sim.ships.to_string()),
            ("sim.factions".into(), sim.factions.to_string()),
            ("sim.radius".into(), sim.radius.to_string()),
            ("sim.area".into(), sim.area.to_string()),
            ("sim.step".into(), sim.step.to_string()),
            ("sim.tick_millis".into(), sim.tick_millis.to_string()),
        ]
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay, RelayConfig::default());
        assert_eq!(config.get("message_capacity").as_deref(), Some("100"));
        assert_eq!(config.get("snapshot_path").as_deref(), Some("(auto)"));
    }

    #[test]
    fn test_set_validates() {
        let mut config = Config::default();
        config.set("sim.ships", "4").unwrap();
        assert_eq!(config.simulation.ships, 4);

        assert!(config.set("message_capacity", "lots").is_err());
        assert!(config.set("clean_interval_ticks", "0").is_err());
        assert!(config.set("no_such_key", "1").is_err());
        assert!(config.get("no_such_key").is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        // Created on first load
        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.set("snapshot_path", "/tmp/relay.db").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.snapshot_path().unwrap(), PathBuf::from("/tmp/relay.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "simulation": { "ships": 3 } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.simulation.ships, 3);
        assert_eq!(config.simulation.factions, 2);
        assert_eq!(config.relay, RelayConfig::default());
    }
}
