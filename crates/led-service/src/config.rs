//! Service configuration.
//!
//! Values come from built-in defaults, then an optional JSON file
//! (`--config`, or `led-service/config.json` in the platform config
//! directory), then command-line flags.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use led_common::{DEFAULT_DEVICE, DEFAULT_LEDS_ROOT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// LED class device name under `leds_root`
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_leds_root")]
    pub leds_root: PathBuf,

    /// Router connect spec
    #[serde(default = "default_address")]
    pub address: String,
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_leds_root() -> PathBuf {
    PathBuf::from(DEFAULT_LEDS_ROOT)
}

fn default_address() -> String {
    ledbus::DEFAULT_ADDRESS.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            leds_root: default_leds_root(),
            address: default_address(),
        }
    }
}

/// Command-line values that override the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub leds_root: Option<PathBuf>,
    pub address: Option<String>,
}

impl ServiceConfig {
    /// Default config file location, if the platform has a config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "led-service").map(|p| p.config_dir().join("config.json"))
    }

    /// Load config from file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ServiceError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ServiceError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the effective config: `explicit` path or the default
    /// location, then `overrides` on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file exists but cannot be loaded.
    pub fn resolve(explicit: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let base = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) => Self::load(&path)?,
                None => {
                    warn!("Cannot determine config directory, using defaults");
                    Self::default()
                }
            },
        };
        Ok(base.with_overrides(overrides))
    }

    #[must_use]
    pub fn with_overrides(self, overrides: ConfigOverrides) -> Self {
        Self {
            device: overrides.device.unwrap_or(self.device),
            leds_root: overrides.leds_root.unwrap_or(self.leds_root),
            address: overrides.address.unwrap_or(self.address),
        }
    }
}
