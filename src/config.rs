//! TOML configuration
//!
//! Lives at `<config dir>/padbridge/config.toml`. A default file is written
//! on first start; every field falls back to its default when missing so
//! older files keep loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lightbar::LightbarMode;
use crate::output::{AxisOverride, TargetOptions};
use crate::slots::MAX_DEVICE_SLOTS;

const CONFIG_DIR: &str = "padbridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub driver: DriverConfig,
    pub slots: Vec<SlotConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            slots: vec![SlotConfig::default()],
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Tick period of the output loop
    pub tick_interval_ms: u64,
    /// Start with the plain idle lightbar on every device
    pub default_light: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            default_light: false,
        }
    }
}

/// Settings of one device slot
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SlotConfig {
    pub enabled: bool,
    pub axis_override: AxisOverride,
    pub target: TargetOptions,
    pub lightbar: LightbarMode,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            axis_override: AxisOverride::None,
            target: TargetOptions::default(),
            lightbar: LightbarMode::default(),
        }
    }
}

impl Config {
    /// `<config dir>/padbridge/config.toml`, or the working directory when
    /// the platform has no config dir
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        if config.slots.len() > MAX_DEVICE_SLOTS {
            warn!(
                "Config lists {} slots, only the first {} are used",
                config.slots.len(),
                MAX_DEVICE_SLOTS
            );
            config.slots.truncate(MAX_DEVICE_SLOTS);
        }
        if config.driver.tick_interval_ms == 0 {
            warn!("tick_interval_ms must be positive, using 1ms");
            config.driver.tick_interval_ms = 1;
        }
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = toml::to_string_pretty(self)?;
        tokio::fs::write(path, text).await?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Loads the config at `path`, writing the defaults there first if the
    /// file does not exist yet
    pub async fn ensure_default_config(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save(path).await?;
            return Ok(config);
        }
        Self::load(path).await
    }
}
