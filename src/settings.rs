//! User-tunable training settings persisted as TOML.
//!
//! Every field carries a serde default so settings files written by older
//! builds keep loading. The [`SettingsHandle`] is shared between the caller
//! and background runs; a run reads what it needs when it starts.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    loader::{FeatureGeometry, ScaleMode},
    persist::{self, PersistError},
};

/// Default filename used to store settings inside the app root.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Errors produced while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Persisted training and dataset preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Step size handed to the trainable backend.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Random flips while training.
    #[serde(default)]
    pub augmentation: bool,
    #[serde(default = "default_training_batch_size")]
    pub training_batch_size: usize,
    #[serde(default = "default_validation_batch_size")]
    pub validation_batch_size: usize,
    /// Batch size of the evaluation pass; 1 switches to per-image inference.
    #[serde(default = "default_evaluation_batch_size")]
    pub evaluation_batch_size: usize,
    #[serde(default = "default_feature_side")]
    pub feature_width: u32,
    #[serde(default = "default_feature_side")]
    pub feature_height: u32,
    /// Smallest edge, in pixels, of newly captured images.
    #[serde(default = "default_smallest_side")]
    pub smallest_side: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            augmentation: false,
            training_batch_size: default_training_batch_size(),
            validation_batch_size: default_validation_batch_size(),
            evaluation_batch_size: default_evaluation_batch_size(),
            feature_width: default_feature_side(),
            feature_height: default_feature_side(),
            smallest_side: default_smallest_side(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Settings {
    /// Model input geometry described by these settings.
    pub fn feature_geometry(&self) -> FeatureGeometry {
        FeatureGeometry {
            width: self.feature_width.max(1),
            height: self.feature_height.max(1),
            scale: ScaleMode::Fill,
        }
    }
}

/// Load settings from `path`; a missing file yields defaults.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist settings to `path`, replacing the previous file atomically.
pub fn save_to(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    persist::write_toml_atomic(path, settings)?;
    Ok(())
}

/// Shared, thread-safe access to the current settings.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
    path: Option<Arc<PathBuf>>,
}

impl SettingsHandle {
    /// Load from disk, falling back to defaults when the file is unusable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_from(&path).unwrap_or_else(|err| {
            warn!("Using default settings: {err}");
            Settings::default()
        });
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path: Some(Arc::new(path)),
        }
    }

    /// Settings that live only in memory.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path: None,
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn learning_rate(&self) -> f64 {
        self.snapshot().learning_rate
    }

    pub fn augmentation_enabled(&self) -> bool {
        self.snapshot().augmentation
    }

    pub fn set_learning_rate(&self, learning_rate: f64) {
        self.update(|settings| settings.learning_rate = learning_rate);
    }

    pub fn set_augmentation(&self, enabled: bool) {
        self.update(|settings| settings.augmentation = enabled);
    }

    /// Mutate the settings and persist the result.
    pub fn update(&self, apply: impl FnOnce(&mut Settings)) {
        let updated = {
            let mut guard = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            apply(&mut *guard);
            guard.clone()
        };
        if let Some(path) = self.path.as_deref()
            && let Err(err) = save_to(&updated, path)
        {
            warn!("Failed to save settings: {err}");
        }
    }
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_training_batch_size() -> usize {
    8
}

fn default_validation_batch_size() -> usize {
    8
}

fn default_evaluation_batch_size() -> usize {
    4
}

fn default_feature_side() -> u32 {
    227
}

fn default_smallest_side() -> u32 {
    256
}

fn default_jpeg_quality() -> u8 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_from(&dir.path().join(SETTINGS_FILE_NAME)).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.learning_rate, 0.001);
        assert!(!settings.augmentation);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "augmentation = true\n").unwrap();
        let settings = load_from(&path).unwrap();
        assert!(settings.augmentation);
        assert_eq!(settings.training_batch_size, 8);
        assert_eq!(settings.feature_geometry().width, 227);
    }

    #[test]
    fn handle_setters_persist_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let handle = SettingsHandle::load(&path);
        handle.set_learning_rate(0.01);
        handle.set_augmentation(true);

        let reloaded = load_from(&path).unwrap();
        assert_eq!(reloaded.learning_rate, 0.01);
        assert!(reloaded.augmentation);
    }

    #[test]
    fn clones_share_state() {
        let handle = SettingsHandle::in_memory(Settings::default());
        let other = handle.clone();
        other.set_augmentation(true);
        assert!(handle.augmentation_enabled());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "learning_rate = \"fast\"").unwrap();
        assert!(load_from(&path).is_err());
        assert_eq!(SettingsHandle::load(&path).snapshot(), Settings::default());
    }
}
