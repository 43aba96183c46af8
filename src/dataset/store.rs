use std::{
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use image::{DynamicImage, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DatasetError, Example, Split, is_image_file};
use crate::{labels::LabelRegistry, persist, settings::Settings};

/// How newly captured images are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadOptions {
    /// Target length of the shorter image edge.
    pub smallest_side: u32,
    pub jpeg_quality: u8,
}

impl Default for PayloadOptions {
    fn default() -> Self {
        Self {
            smallest_side: 256,
            jpeg_quality: 50,
        }
    }
}

impl From<&Settings> for PayloadOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            smallest_side: settings.smallest_side.max(1),
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
        }
    }
}

/// Indexed examples of one split backed by `<root>/<label>/<id>` files.
///
/// The in-memory list only changes after the matching file operation
/// succeeded, so the list and the folder tree never disagree.
#[derive(Debug, Clone)]
pub struct ImageStore {
    split: Split,
    root: PathBuf,
    examples: Vec<Example>,
    payload: PayloadOptions,
}

impl ImageStore {
    /// Open the split below `data_root`, creating label folders and scanning them.
    pub fn open(data_root: &Path, split: Split, labels: &LabelRegistry) -> Self {
        let mut store = Self {
            split,
            root: data_root.join(split.folder_name()),
            examples: Vec::new(),
            payload: PayloadOptions::default(),
        };
        for label in labels.label_names() {
            store.create_label_folder(label);
        }
        store.scan(labels);
        store
    }

    pub fn with_payload_options(mut self, payload: PayloadOptions) -> Self {
        self.payload = payload;
        self
    }

    pub fn split(&self) -> Split {
        self.split
    }

    /// Folder holding this split's label folders.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn example(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.examples.get(index).map(|example| example.label.as_str())
    }

    /// Location of the payload backing the example at `index`.
    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        self.examples
            .get(index)
            .map(|example| payload_path(&self.root, example))
    }

    /// Ensure the folder for `label` exists; failures are logged.
    pub fn create_label_folder(&self, label: &str) {
        let dir = self.root.join(label);
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!("Failed to create label folder {}: {err}", dir.display());
        }
    }

    /// Rebuild the example list from the label folders on disk.
    ///
    /// Labels are visited in registry order; files inside one folder are
    /// visited in file name order.
    pub fn scan(&mut self, labels: &LabelRegistry) {
        let mut examples = Vec::new();
        for label in labels.label_names() {
            let ids = match list_payloads(&self.root.join(label)) {
                Ok(ids) => ids,
                Err(err) => {
                    debug!("Skipping label {label:?} in {} split: {err}", self.split);
                    continue;
                }
            };
            examples.extend(ids.into_iter().map(|id| Example {
                id,
                label: label.clone(),
            }));
        }
        debug!("Scanned {} {} examples", examples.len(), self.split);
        self.examples = examples;
    }

    /// Persist `image` under a fresh identifier and append it.
    ///
    /// Returns the index of the new example, or `None` (logged) when the
    /// label is unknown or the payload could not be written.
    pub fn add(
        &mut self,
        labels: &LabelRegistry,
        image: &DynamicImage,
        label: &str,
    ) -> Option<usize> {
        match self.try_add(labels, image, label) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!("Failed to add {} image for {label:?}: {err}", self.split);
                None
            }
        }
    }

    fn try_add(
        &mut self,
        labels: &LabelRegistry,
        image: &DynamicImage,
        label: &str,
    ) -> Result<usize, DatasetError> {
        if !labels.contains(label) {
            return Err(DatasetError::UnknownLabel(label.to_string()));
        }
        let bytes = encode_payload(image, self.payload)?;
        let example = Example {
            id: format!("{}.jpg", Uuid::new_v4()),
            label: label.to_string(),
        };
        let path = payload_path(&self.root, &example);
        persist::replace_atomic(&path, |file| file.write_all(&bytes))?;
        self.examples.push(example);
        Ok(self.examples.len() - 1)
    }

    /// Delete the payload at `index`, then drop the example.
    ///
    /// All later indices shift down by one. A payload that is already gone
    /// counts as deleted; any other delete failure leaves the store unchanged.
    pub fn remove(&mut self, index: usize) -> Option<Example> {
        let path = self.image_path(index)?;
        if let Err(err) = persist::remove_if_exists(&path) {
            warn!("Failed to delete {}: {err}", path.display());
            return None;
        }
        Some(self.examples.remove(index))
    }

    /// Indices of every example carrying `label`, in store order.
    pub fn indices_with_label(&self, label: &str) -> Vec<usize> {
        self.examples
            .iter()
            .enumerate()
            .filter(|(_, example)| example.label == label)
            .map(|(index, _)| index)
            .collect()
    }

    /// Copy the bundled seed images of every built-in label into the store.
    ///
    /// The seed tree mirrors the data layout
    /// (`<seed_root>/<split>/<label>/<file>`). Files whose destination already
    /// exists are skipped, so repeated imports never duplicate examples.
    /// Returns how many examples were added.
    pub fn import_builtins(&mut self, seed_root: &Path, labels: &LabelRegistry) -> usize {
        let source_root = seed_root.join(self.split.folder_name());
        let mut imported = Vec::new();
        for label in labels.builtin_names() {
            let source_dir = source_root.join(label);
            let ids = match list_payloads(&source_dir) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!("No seed images at {}: {err}", source_dir.display());
                    continue;
                }
            };
            self.create_label_folder(label);
            for id in ids {
                let example = Example {
                    id,
                    label: label.clone(),
                };
                let dest = payload_path(&self.root, &example);
                if dest.exists() {
                    continue;
                }
                match fs::copy(source_dir.join(&example.id), &dest) {
                    Ok(_) => imported.push(example),
                    Err(err) => warn!("Failed to import {}: {err}", dest.display()),
                }
            }
        }
        let count = imported.len();
        self.examples.extend(imported);
        info!("Imported {count} seed images into the {} split", self.split);
        count
    }

    /// Decode the image at `index` for display.
    pub fn load_image(&self, index: usize) -> Option<DynamicImage> {
        let path = self.image_path(index)?;
        match image::open(&path) {
            Ok(image) => Some(image),
            Err(err) => {
                warn!("Failed to decode {}: {err}", path.display());
                None
            }
        }
    }

    /// Immutable copy of the current examples for a background pass.
    pub fn snapshot(&self) -> DatasetSnapshot {
        DatasetSnapshot {
            split: self.split,
            root: Arc::from(self.root.as_path()),
            examples: Arc::from(self.examples.as_slice()),
        }
    }
}

/// Frozen example list handed to loaders running off the caller's thread.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    split: Split,
    root: Arc<Path>,
    examples: Arc<[Example]>,
}

impl DatasetSnapshot {
    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.examples.get(index).map(|example| example.label.as_str())
    }

    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        self.examples
            .get(index)
            .map(|example| payload_path(&self.root, example))
    }
}

fn payload_path(root: &Path, example: &Example) -> PathBuf {
    root.join(&example.label).join(&example.id)
}

fn list_payloads(dir: &Path) -> Result<Vec<String>, DatasetError> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut ids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image_file(path))
        .filter_map(|path| path.file_name().and_then(|name| name.to_str()).map(str::to_string))
        .collect();
    ids.sort();
    Ok(ids)
}

/// Resize so the shorter edge equals the target and encode as JPEG.
fn encode_payload(image: &DynamicImage, options: PayloadOptions) -> Result<Vec<u8>, DatasetError> {
    let (width, height) =
        smallest_side_dimensions(image.width(), image.height(), options.smallest_side);
    let rgb = image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();
    let mut bytes = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, options.jpeg_quality))?;
    Ok(bytes.into_inner())
}

fn smallest_side_dimensions(width: u32, height: u32, side: u32) -> (u32, u32) {
    let (width, height) = (width.max(1) as f64, height.max(1) as f64);
    let side = side.max(1) as f64;
    let (scaled_w, scaled_h) = if width >= height {
        (width / height * side, side)
    } else {
        (side, height / width * side)
    };
    (scaled_w.round().max(1.0) as u32, scaled_h.round().max(1.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 10])))
    }

    #[test]
    fn open_creates_label_folders() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let store = ImageStore::open(dir.path(), Split::Train, &labels);
        assert!(store.is_empty());
        for label in labels.label_names() {
            assert!(dir.path().join("train").join(label).is_dir());
        }
    }

    #[test]
    fn add_writes_resized_jpeg_before_recording() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Train, &labels)
            .with_payload_options(PayloadOptions {
                smallest_side: 16,
                jpeg_quality: 80,
            });

        let index = store.add(&labels, &solid(64, 32), "✋").unwrap();

        let example = store.example(index).unwrap();
        assert!(example.id.ends_with(".jpg"));
        let saved = image::open(store.image_path(index).unwrap()).unwrap();
        assert_eq!((saved.width(), saved.height()), (32, 16));
    }

    #[test]
    fn add_with_unknown_label_is_a_no_op() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Test, &labels);
        assert_eq!(store.add(&labels, &solid(8, 8), "nope"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn add_then_remove_restores_count_and_drops_that_example() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Train, &labels);
        store.add(&labels, &solid(8, 8), "✊").unwrap();
        let before = store.len();

        let index = store.add(&labels, &solid(8, 8), "✌️").unwrap();
        let added = store.example(index).unwrap().clone();
        let path = store.image_path(index).unwrap();
        let removed = store.remove(index).unwrap();

        assert_eq!(removed.id, added.id);
        assert_eq!(store.len(), before);
        assert!(store.examples().iter().all(|example| example.id != added.id));
        assert!(!path.exists());
    }

    #[test]
    fn remove_tolerates_missing_payload() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Train, &labels);
        let index = store.add(&labels, &solid(8, 8), "✊").unwrap();
        fs::remove_file(store.image_path(index).unwrap()).unwrap();
        assert!(store.remove(index).is_some());
        assert!(store.is_empty());
        assert!(store.remove(0).is_none());
    }

    #[test]
    fn scan_picks_up_files_in_label_then_name_order() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Train, &labels);
        let train = dir.path().join("train");
        solid(4, 4).save(train.join("✋").join("b.png")).unwrap();
        solid(4, 4).save(train.join("✋").join("a.png")).unwrap();
        solid(4, 4).save(train.join("✊").join("z.png")).unwrap();
        fs::write(train.join("✊").join("notes.txt"), "skip").unwrap();

        store.scan(&labels);

        let ids: Vec<_> = store.examples().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["z.png", "a.png", "b.png"]);
        assert_eq!(store.indices_with_label("✋"), vec![1, 2]);
    }

    #[test]
    fn import_builtins_is_idempotent() {
        let seed = tempdir().unwrap();
        let data = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        for label in labels.builtin_names() {
            let folder = seed.path().join("test").join(label);
            fs::create_dir_all(&folder).unwrap();
            solid(4, 4).save(folder.join("seed.png")).unwrap();
        }
        let mut store = ImageStore::open(data.path(), Split::Test, &labels);

        assert_eq!(store.import_builtins(seed.path(), &labels), 3);
        assert_eq!(store.import_builtins(seed.path(), &labels), 0);
        assert_eq!(store.len(), 3);

        store.scan(&labels);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut store = ImageStore::open(dir.path(), Split::Train, &labels);
        store.add(&labels, &solid(8, 8), "✊").unwrap();
        let snapshot = store.snapshot();
        store.add(&labels, &solid(8, 8), "✋").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.label(0), Some("✊"));
        assert_eq!(snapshot.image_path(0), store.image_path(0));
    }

    #[test]
    fn smallest_side_keeps_aspect_ratio() {
        assert_eq!(smallest_side_dimensions(400, 300, 256), (341, 256));
        assert_eq!(smallest_side_dimensions(300, 600, 256), (256, 512));
        assert_eq!(smallest_side_dimensions(10, 10, 256), (256, 256));
    }
}
