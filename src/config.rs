//! Persistent settings stored in `eqgzi-manager.conf` next to the zones folder.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "eqgzi-manager.conf";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{} is a directory, should be a file", .0.display())]
    IsDirectory(PathBuf),

    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decode {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("encode config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory Blender is started from
    pub blender_path: String,
    /// EverQuest client directory converted zones are copied to
    pub eq_path: String,
    #[serde(rename = "eq_copy")]
    pub is_eq_copy: bool,
    pub last_zone: String,
    /// EQEmu server directory, if any
    pub server_path: String,
    #[serde(rename = "server_copy")]
    pub is_server_copy: bool,
    pub eqgzi_version: String,
    pub lantern_version: String,
}

impl Config {
    /// Load the config at `path`, writing a default one if none exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Err(ConfigError::IsDirectory(path.to_path_buf())),
            Ok(_) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default_for_host();
                cfg.save(path)?;
                tracing::info!(path = %path.display(), "created default config");
                Ok(cfg)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn default_for_host() -> Self {
        let mut cfg = Self::default();
        if cfg!(target_os = "macos") && Path::new(crate::paths::MACOS_BLENDER_APP).exists() {
            cfg.blender_path = crate::paths::MACOS_BLENDER_DIR.to_string();
        }
        cfg
    }
}
