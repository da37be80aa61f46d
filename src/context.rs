//! Application state shared by the CLI commands.

use crate::config::{Config, ConfigError, CONFIG_FILE};
use crate::model::PipelineConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Working directory plus the settings loaded from it.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
}

impl AppContext {
    pub fn load(work_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = work_dir.join(CONFIG_FILE);
        let config = Config::load_or_create(&config_path)?;
        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            config_path,
            config,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.save(&self.config_path)
    }

    pub fn zones_dir(&self) -> PathBuf {
        self.work_dir.join("zones")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.work_dir.join("tools")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join("cache")
    }

    /// Pick the zone to act on: `last_zone` when it still exists, else the first zone.
    ///
    /// Returns whether `last_zone` changed so callers can persist it.
    pub fn resolve_zone(&mut self, zones: &[String]) -> (Option<String>, bool) {
        if zones.iter().any(|z| *z == self.config.last_zone) {
            return (Some(self.config.last_zone.clone()), false);
        }
        match zones.first() {
            Some(first) => {
                self.config.last_zone = first.clone();
                (Some(first.clone()), true)
            }
            None => (None, false),
        }
    }

    pub fn pipeline_config(&self, zone: &str, timeout: Option<Duration>) -> PipelineConfig {
        PipelineConfig {
            work_dir: self.work_dir.clone(),
            zone: zone.to_string(),
            blender_path: self.config.blender_path.clone(),
            eq_path: self.config.eq_path.clone(),
            server_path: self.config.server_path.clone(),
            eq_copy: self.config.is_eq_copy,
            server_copy: self.config.is_server_copy,
            timeout,
        }
    }
}
