//! Application directory helpers anchored to a single `.gestures` folder.
//!
//! Labels, training history, settings, the per-split image folders, model
//! artifacts and logs all live below this root. It defaults to the OS config
//! directory (e.g., `%APPDATA%` on Windows) and can be moved with the
//! `GESTURES_CONFIG_HOME` environment variable for tests or portable setups.

use std::path::PathBuf;
#[cfg(test)]
use std::sync::{LazyLock, Mutex};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".gestures";
/// Environment variable that overrides the base config directory.
pub const CONFIG_HOME_ENV: &str = "GESTURES_CONFIG_HOME";

#[cfg(test)]
static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Well-known folders below the application root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSubdir {
    /// Per-launch log files.
    Logs,
    /// Trained model artifacts.
    Models,
}

impl AppSubdir {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Models => "models",
        }
    }
}

/// Return the root `.gestures` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Return `kind` inside the `.gestures` root, creating both if needed.
pub fn app_subdir(kind: AppSubdir) -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join(kind.dir_name()))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    match std::fs::create_dir_all(&path) {
        Ok(()) => Ok(path),
        Err(source) => Err(AppDirError::CreateDir { path, source }),
    }
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = base_override() {
        return Some(path);
    }
    if let Ok(path) = std::env::var(CONFIG_HOME_ENV) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
fn base_override() -> Option<PathBuf> {
    CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
}

#[cfg(not(test))]
fn base_override() -> Option<PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct BaseOverride;

    impl BaseOverride {
        fn set(path: PathBuf) -> Self {
            *CONFIG_BASE_OVERRIDE.lock().unwrap() = Some(path);
            Self
        }
    }

    impl Drop for BaseOverride {
        fn drop(&mut self) {
            if let Ok(mut guard) = CONFIG_BASE_OVERRIDE.lock() {
                *guard = None;
            }
        }
    }

    #[test]
    fn override_moves_root_and_subdirs() {
        let base = tempdir().unwrap();
        let _guard = BaseOverride::set(base.path().to_path_buf());
        let root = app_root_dir().unwrap();
        assert_eq!(root, base.path().join(APP_DIR_NAME));
        assert!(root.is_dir());
        for kind in [AppSubdir::Logs, AppSubdir::Models] {
            let dir = app_subdir(kind).unwrap();
            assert_eq!(dir, root.join(kind.dir_name()));
            assert!(dir.is_dir());
        }
    }

    #[test]
    fn blocked_directory_reports_its_path() {
        let base = tempdir().unwrap();
        let file = base.path().join("occupied");
        std::fs::write(&file, b"").unwrap();
        let err = ensure_dir(file.join("child")).unwrap_err();
        assert!(matches!(err, AppDirError::CreateDir { ref path, .. } if path.ends_with("child")));
    }
}
