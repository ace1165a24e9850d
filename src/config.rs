//! Configuration for regionflow
//!
//! Settings are stored as TOML. Every section and field has a default, so a
//! partial file (or none at all) is valid.
//!
//! # Config Location
//!
//! [`RegionflowConfig::load_or_default`] looks in the platform config
//! directory:
//! - **Linux**: `~/.config/regionflow/regionflow.toml`
//! - **macOS**: `~/Library/Application Support/regionflow/regionflow.toml`
//! - **Windows**: `%APPDATA%\regionflow\regionflow.toml`
//!
//! # Example
//!
//! ```toml
//! [engine]
//! threads = 4
//! min_piece_extent = 8
//!
//! [deconvolution]
//! iterations = 25
//! padding = "zero"
//! division = { policy = "clamp", epsilon = 1e-6 }
//!
//! [logging]
//! filter = "info,regionflow=trace"
//! ```

use crate::error::{RegionflowError, Result};
use crate::solver::RichardsonLucySettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name under the platform config directory
pub const APP_DIR: &str = "regionflow";

/// Config filename
pub const CONFIG_FILE: &str = "regionflow.toml";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,regionflow=debug";

/// Path of the default config file, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; `None` uses the available hardware parallelism
    pub threads: Option<usize>,

    /// Smallest extent a piece may have along the split axis
    pub min_piece_extent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            min_piece_extent: 1,
        }
    }
}

/// Logging settings for the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionflowConfig {
    pub engine: EngineConfig,
    pub deconvolution: RichardsonLucySettings,
    pub logging: LoggingConfig,
}

impl RegionflowConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegionflowError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as TOML, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
