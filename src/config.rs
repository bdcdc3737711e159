//! Session configuration
//!
//! Defines the per-session handler settings shared between watch and batch
//! modes. The shell mutates these through a shared handle; dispatchers read
//! them at dispatch time, so a change applies to the next submitted file,
//! not to in-flight conversions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Resolution ceiling for square textures.
///
/// Only square sources are ever clamped; a non-square texture keeps its
/// rounded dimensions regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum MaxResolution {
    #[value(name = "512")]
    R512,
    #[value(name = "1024")]
    R1024,
    #[value(name = "2048")]
    R2048,
}

impl MaxResolution {
    pub fn pixels(self) -> u32 {
        match self {
            MaxResolution::R512 => 512,
            MaxResolution::R1024 => 1024,
            MaxResolution::R2048 => 2048,
        }
    }
}

impl Default for MaxResolution {
    fn default() -> Self {
        MaxResolution::R1024
    }
}

/// Settings applied to every conversion dispatched while they are current.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Remove the source image after a successful encode
    pub delete_source: bool,

    /// Ceiling for square texture dimensions
    pub max_resolution: MaxResolution,

    /// Watch/convert subdirectories as well
    pub recursive: bool,
}

/// Shared handle to the session config.
///
/// The shell owns mutation; dispatchers take a snapshot per dispatched file.
pub type SharedConfig = Arc<RwLock<HandlerConfig>>;

pub fn shared(config: HandlerConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Snapshot the current settings. A poisoned lock falls back to the last
/// value the poisoning writer left behind.
pub fn snapshot(config: &SharedConfig) -> HandlerConfig {
    match config.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Validate a root directory before starting a watch or batch run.
pub fn validate_root(root: &Path) -> Result<(), ConfigError> {
    if !root.exists() {
        return Err(ConfigError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ConfigError::NotADirectory(root.to_path_buf()));
    }
    Ok(())
}

/// Configuration errors, surfaced synchronously before any work starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Folder not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}
