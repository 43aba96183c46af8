//! Small durable-record helpers shared by labels, history, settings and models.
//!
//! Writes always go to a temporary file next to the destination which is then
//! renamed over it, so readers never observe a half-written record.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while reading or writing a persisted record.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize TOML for {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

/// Read a JSON record, returning `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), PersistError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    replace_atomic(path, |file| file.write_all(&data))
}

/// Serialize `value` as TOML and atomically replace `path`.
pub fn write_toml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let data = toml::to_string_pretty(value).map_err(|source| PersistError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    replace_atomic(path, |file| file.write_all(data.as_bytes()))
}

/// Let `write` fill a temporary sibling of `path`, then rename it into place.
///
/// On any failure the previous contents of `path` are left untouched.
pub fn replace_atomic<F>(path: &Path, write: F) -> Result<(), PersistError>
where
    F: FnOnce(&mut NamedTempFile) -> std::io::Result<()>,
{
    let write_err = |source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;
    let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
    write(&mut temp).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}

/// Remove a file, treating "already absent" as success.
pub fn remove_if_exists(path: &Path) -> Result<(), PersistError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}
