//! Host configuration and its on-disk location.
//!
//! Config directory priority:
//! 1. explicit directory passed by the caller
//! 2. `FXGRAPH_CONFIG_DIR` environment variable
//! 3. platform config directory from dirs-next (`~/.config/fxgraph` on Linux)
//! 4. `.` if everything else fails

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::cache_man::CacheManager;
use crate::entities::project::ProjectSettings;

pub const CONFIG_DIR_ENV: &str = "FXGRAPH_CONFIG_DIR";
pub const CONFIG_FILE: &str = "fxgraph.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Maximum number of cached images
    pub cache_capacity: usize,
    /// Fraction of available memory the cache may use (0.0-1.0)
    pub mem_fraction: f64,
    /// Memory kept free for the system, in GB
    pub reserve_gb: f64,
    /// Absolute cache budget in MB; overrides fraction and reserve
    pub memory_limit_mb: Option<usize>,
    /// Render tiles per image, 0 = one per CPU
    pub tiles: usize,
    pub project: ProjectSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 512,
            mem_fraction: 0.75,
            reserve_gb: 2.0,
            memory_limit_mb: None,
            tiles: 0,
            project: ProjectSettings::default(),
        }
    }
}

impl HostConfig {
    pub fn resolve_tiles(&self) -> usize {
        if self.tiles == 0 { num_cpus::get().max(1) } else { self.tiles }
    }

    /// Memory budget described by this config.
    pub fn cache_manager(&self) -> Arc<CacheManager> {
        let manager = match self.memory_limit_mb {
            Some(mb) => CacheManager::with_limit(mb.saturating_mul(1024 * 1024)),
            None => CacheManager::new(self.mem_fraction, self.reserve_gb),
        };
        Arc::new(manager)
    }

    pub fn config_dir(explicit: Option<&Path>) -> PathBuf {
        if let Some(dir) = explicit {
            return dir.to_path_buf();
        }
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        if let Some(dir) = dirs_next::config_dir() {
            return dir.join("fxgraph");
        }
        PathBuf::from(".")
    }

    pub fn config_file(explicit: Option<&Path>) -> PathBuf {
        Self::config_dir(explicit).join(CONFIG_FILE)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&json).with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}
