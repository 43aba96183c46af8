//! Persisted per-epoch training log.
//!
//! The whole log is rewritten on every append. A missing or unreadable file
//! yields an empty history.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persist;

pub const HISTORY_FILE_NAME: &str = "history.json";

/// Metrics of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Zero-based position in the history.
    pub epoch: usize,
    pub training_loss: f64,
    pub validation_loss: f64,
    pub validation_accuracy: f64,
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5}  {:>10.4}  {:>10.4}  {:>7.2}%",
            self.epoch + 1,
            self.training_loss,
            self.validation_loss,
            self.validation_accuracy * 100.0
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    events: Vec<HistoryEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    events: Vec<HistoryEvent>,
    path: Option<PathBuf>,
}

impl TrainingHistory {
    /// Read the log at `path`; problems are logged and yield an empty log.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let events = match persist::read_json::<HistoryFile>(&path) {
            Ok(Some(file)) => file.events,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Training history unreadable, starting empty: {err}");
                Vec::new()
            }
        };
        Self {
            events,
            path: Some(path),
        }
    }

    /// A history that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEvent> {
        self.events.last()
    }

    /// Append the next epoch and persist the full log.
    pub fn append(
        &mut self,
        training_loss: f64,
        validation_loss: f64,
        validation_accuracy: f64,
    ) -> HistoryEvent {
        let event = HistoryEvent {
            epoch: self.events.len(),
            training_loss,
            validation_loss,
            validation_accuracy,
        };
        self.events.push(event);
        self.save();
        event
    }

    /// Forget every event and remove the persisted log.
    pub fn clear(&mut self) {
        self.events.clear();
        if let Some(path) = self.path.as_deref()
            && let Err(err) = persist::remove_if_exists(path)
        {
            warn!("Failed to remove training history: {err}");
        }
    }

    fn save(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let file = HistoryFile {
            events: self.events.clone(),
        };
        if let Err(err) = persist::write_json_atomic(path, &file) {
            warn!("Failed to persist training history: {err}");
        }
    }
}

/// Default location of the history inside an app root.
pub fn history_path(root: &Path) -> PathBuf {
    root.join(HISTORY_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_numbers_epochs_and_persists() {
        let dir = tempdir().unwrap();
        let path = history_path(dir.path());
        let mut history = TrainingHistory::load(&path);
        history.append(0.9, 1.0, 0.3);
        let second = history.append(0.8, 0.9, 0.5);
        assert_eq!(second.epoch, 1);

        let reloaded = TrainingHistory::load(&path);
        assert_eq!(reloaded.events(), history.events());
    }

    #[test]
    fn corrupt_file_yields_empty_history() {
        let dir = tempdir().unwrap();
        let path = history_path(dir.path());
        std::fs::write(&path, "{ events: oops").unwrap();
        let mut history = TrainingHistory::load(&path);
        assert!(history.is_empty());
        assert_eq!(history.append(0.5, 0.5, 0.5).epoch, 0);
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = tempdir().unwrap();
        let path = history_path(dir.path());
        let mut history = TrainingHistory::load(&path);
        history.append(0.5, 0.6, 0.7);
        assert!(path.exists());
        history.clear();
        assert!(history.is_empty());
        assert!(!path.exists());
        history.clear();
    }

    #[test]
    fn displays_as_table_row() {
        let event = HistoryEvent {
            epoch: 2,
            training_loss: 0.25,
            validation_loss: 0.5,
            validation_accuracy: 0.875,
        };
        assert_eq!(event.to_string(), "    3      0.2500      0.5000    87.50%");
    }
}
