//! File-backed gesture image datasets.
//!
//! Each split keeps its images under `<data root>/<split>/<label>/<id>`. The
//! [`ImageStore`] is the indexed view of one split, [`GroupedView`] groups its
//! indices by label for browsing and selection, and [`DatasetSnapshot`] is the
//! immutable copy background loaders iterate over.

mod grouped;
mod store;

pub use grouped::GroupedView;
pub use store::{DatasetSnapshot, ImageStore, PayloadOptions};

use std::path::PathBuf;

use thiserror::Error;

use crate::persist::PersistError;

/// Train or test partition of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// Folder name of the split below the data root.
    pub fn folder_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "train" => Some(Split::Train),
            "test" => Some(Split::Test),
            _ => None,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// One stored image: its file name inside the label folder and its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub id: String,
    pub label: String,
}

/// Failures while touching image payloads on disk.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Label {0:?} is not registered")]
    UnknownLabel(String),
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File extensions recognized as image payloads.
pub(crate) fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "jpg" || ext == "jpeg" || ext == "png"
        })
        .unwrap_or(false)
}
