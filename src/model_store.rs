//! Durable model artifact handling.
//!
//! Models are serialized in full before anything touches the destination,
//! then written to a temporary sibling and renamed over the previous
//! artifact. A failure at any step leaves the previous artifact in place.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;

use crate::{
    backend::{BackendError, TrainableClassifier},
    persist::{self, PersistError},
};

/// File name of the trained gesture model inside the models directory.
pub const MODEL_FILE_NAME: &str = "gestures.model.json";

#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("Failed to serialize model: {0}")]
    Serialize(#[from] BackendError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("Failed to read seed model {path}: {source}")]
    ReadSeed {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn model_path(models_dir: &Path) -> PathBuf {
    models_dir.join(MODEL_FILE_NAME)
}

/// Serialize `model` and atomically swap it in at `dest`.
pub fn replace_atomic<B: TrainableClassifier>(
    dest: &Path,
    model: &B,
) -> Result<(), ModelStoreError> {
    let mut bytes = Vec::new();
    model.write_to(&mut bytes)?;
    persist::replace_atomic(dest, |file| file.write_all(&bytes))?;
    info!("Saved model to {}", dest.display());
    Ok(())
}

/// Copy a bundled model to `dest` unless one is already there.
///
/// Returns whether a copy was made.
pub fn install_if_missing(seed: &Path, dest: &Path) -> Result<bool, ModelStoreError> {
    if dest.exists() {
        return Ok(false);
    }
    let bytes = fs::read(seed).map_err(|source| ModelStoreError::ReadSeed {
        path: seed.to_path_buf(),
        source,
    })?;
    persist::replace_atomic(dest, |file| file.write_all(&bytes))?;
    info!("Installed seed model at {}", dest.display());
    Ok(true)
}

/// Delete the trained model; a missing file is not an error.
pub fn remove(dest: &Path) -> Result<(), ModelStoreError> {
    persist::remove_if_exists(dest)?;
    Ok(())
}
