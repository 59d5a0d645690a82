//! Detector configuration.
//!
//! Stored as JSON under `<config_dir>/phase-watch/config.json`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Dotted identifier path, e.g. `DataModel` or `Game.Workspace`.
static RE_OBJECT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap());

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Intervals at or above this are accepted but make transitions sluggish.
const SLOW_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Delay between two inference cycles of the polling loop
    pub poll_interval_ms: u64,
    /// Top-level objects that must all exist for the application to count as running
    pub required_objects: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            required_objects: vec!["DataModel".to_string(), "Workspace".to_string()],
        }
    }
}

impl DetectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check the configuration before it is handed to a detector.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::ZeroPollInterval);
        }
        if self.poll_interval_ms >= SLOW_POLL_INTERVAL_MS {
            tracing::warn!(
                poll_interval_ms = self.poll_interval_ms,
                "Poll interval is not sub-second; phase changes will lag"
            );
        }

        if self.required_objects.is_empty() {
            return Err(Error::NoRequiredObjects);
        }
        if let Some(bad) = self
            .required_objects
            .iter()
            .find(|path| !RE_OBJECT_PATH.is_match(path))
        {
            return Err(Error::InvalidObjectPath(bad.clone()));
        }

        Ok(())
    }

    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults if the file does not exist.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Returns the path to the default configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("phase-watch").join("config.json"))
}
