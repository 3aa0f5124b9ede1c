use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::{
    AUDIT_LOG_FILENAME, DEFAULT_DATA_DIR, DEFAULT_FIAT_UNIT, PERIODIC_SYNC_INTERVAL_SECS,
    POST_ACTION_SYNC_DELAY_MS,
};
use crate::error::ConfigError;
use crate::types::BitcoinUnit;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    pub unit: BitcoinUnit,
    pub fiat_unit: String,
    /// Fiat price of one bitcoin. Zero hides fiat values.
    pub fiat_rate: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub periodic_interval_secs: u64,
    pub follow_up_delay_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: String,
    /// JSON snapshot the inspector reads node state from.
    #[serde(default)]
    pub node_snapshot: Option<String>,
    /// Hide expired and canceled invoices from the transaction list.
    pub hide_archived: bool,
    pub audit_log: bool,
    pub display: DisplayConfig,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            node_snapshot: None,
            hide_archived: true,
            audit_log: true,
            display: DisplayConfig {
                unit: BitcoinUnit::Sat,
                fiat_unit: DEFAULT_FIAT_UNIT.to_string(),
                fiat_rate: 0.0,
            },
            sync: SyncConfig {
                periodic_interval_secs: PERIODIC_SYNC_INTERVAL_SECS,
                follow_up_delay_ms: POST_ACTION_SYNC_DELAY_MS,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_str = toml::to_string_pretty(&self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Load the config at `path`, writing the defaults there first if it does
    /// not exist. An unreadable file falls back to defaults.
    pub fn load_or_create(path: &Path) -> Self {
        if !path.exists() {
            let config = Config::default();
            match config.save_to_file(path) {
                Ok(()) => info!(path = %path.display(), "wrote default config"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to save default config"),
            }
            return config;
        }

        match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                Config::default()
            }
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn audit_log_path(&self) -> Option<PathBuf> {
        self.audit_log.then(|| self.data_dir().join(AUDIT_LOG_FILENAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_or_create(&path);
        assert!(path.exists());
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_custom_config() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/tmp/wallet"
            hide_archived = false
            audit_log = false

            [display]
            unit = "milliBitcoin"
            fiat_unit = "EUR"
            fiat_rate = 60000.0

            [sync]
            periodic_interval_secs = 30
            follow_up_delay_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.display.unit, BitcoinUnit::MilliBitcoin);
        assert_eq!(config.sync.follow_up_delay_ms, 500);
        assert!(config.node_snapshot.is_none());
        assert!(config.audit_log_path().is_none());
    }

    #[test]
    fn test_malformed_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "data_dir = [").unwrap();

        assert!(Config::from_file(&path).is_err());
        assert_eq!(Config::load_or_create(&path), Config::default());
    }
}
