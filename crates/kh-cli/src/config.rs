//! Configuration loading and management.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use kh_core::{ComboTrackerConfig, DEFAULT_MIN_COMBO_LEN, DEFAULT_STALE_AFTER_SECS};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path to the keypress database.
    pub database_path: PathBuf,
    /// Smallest number of simultaneously held keys counted as a combo.
    pub min_combo_len: usize,
    /// Seconds after which a key with no release is treated as released.
    pub stale_after_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("keypresses.sqlite"),
            min_combo_len: DEFAULT_MIN_COMBO_LEN,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (KH_*)
        figment = figment.merge(Env::prefixed("KH_"));

        let config: Self = figment.extract()?;
        config.combo_config()?;
        Ok(config)
    }

    /// Tracker tuning derived from this configuration.
    ///
    /// Fails if `min_combo_len` is zero or `stale_after_secs` is not a
    /// positive number of seconds that fits a [`TimeDelta`].
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn combo_config(&self) -> Result<ComboTrackerConfig, figment::Error> {
        if self.min_combo_len == 0 {
            return Err("min_combo_len must be at least 1".into());
        }
        if self.stale_after_secs <= 0 {
            return Err(format!(
                "stale_after_secs must be positive, got {}",
                self.stale_after_secs
            )
            .into());
        }
        let stale_after = TimeDelta::try_seconds(self.stale_after_secs).ok_or_else(|| {
            figment::Error::from(format!(
                "stale_after_secs {} is out of range",
                self.stale_after_secs
            ))
        })?;

        Ok(ComboTrackerConfig {
            min_combo_len: self.min_combo_len,
            stale_after,
        })
    }
}

/// Returns the platform-specific config directory for keyheat.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("keyheat"))
}

/// Returns the platform-specific data directory for keyheat.
///
/// On Linux: `~/.local/share/keyheat`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("keyheat"))
}
