//! Profile manager configuration, stored as JSON.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_layout_key() -> String {
    "portal".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileManagerConfig {
    pub portal_name: String,
    #[serde(default = "default_layout_key")]
    pub default_layout_key: String,
    /// Root directory of the file-backed profile store. Relative paths are
    /// resolved against the directory of the configuration file.
    pub storage_root: PathBuf,
}

impl ProfileManagerConfig {
    pub fn new(portal_name: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            portal_name: portal_name.into(),
            default_layout_key: default_layout_key(),
            storage_root: storage_root.into(),
        }
    }

    pub fn with_default_layout_key(mut self, layout_key: impl Into<String>) -> Self {
        self.default_layout_key = layout_key.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portal_name.trim().is_empty() {
            return Err(ConfigError::Invalid("portal_name must not be empty".into()));
        }
        if self.default_layout_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_layout_key must not be empty".into(),
            ));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage_root must not be empty".into()));
        }
        Ok(())
    }
}

pub fn load_config_from_file(path: &Path) -> Result<ProfileManagerConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    let mut config: ProfileManagerConfig = serde_json::from_str(&raw)?;

    if config.storage_root.is_relative()
        && let Some(dir) = path.parent()
    {
        config.storage_root = dir.join(&config.storage_root);
    }

    config.validate()?;
    tracing::debug!("Loaded profile manager config from {:?}", path);
    Ok(config)
}

pub fn save_config_to_file(config: &ProfileManagerConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}
