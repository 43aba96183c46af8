//! Process-wide state wired together once at startup.
//!
//! The workspace owns the label registry, settings, training history and
//! the grouped views of both splits, and hands references to the components
//! that need them.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use image::DynamicImage;
use tracing::{info, warn};

use crate::{
    app_dirs::{self, AppDirError, AppSubdir},
    backend::softmax::SoftmaxClassifier,
    dataset::{Example, GroupedView, ImageStore, PayloadOptions, Split},
    history::{TrainingHistory, history_path},
    labels::{LabelRegistry, LabelSpace, is_valid_label_name, labels_path},
    loader::{BatchLoader, LoaderOptions},
    model_store::{self, ModelStoreError},
    settings::{SETTINGS_FILE_NAME, SettingsHandle},
    training::TrainingSources,
};

/// Result of a label addition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAddition {
    Added,
    Duplicate,
    Full,
    InvalidName,
}

pub struct Workspace {
    root: PathBuf,
    labels: LabelRegistry,
    settings: SettingsHandle,
    history: Arc<Mutex<TrainingHistory>>,
    train: GroupedView,
    test: GroupedView,
    model_path: PathBuf,
}

impl Workspace {
    /// Open the workspace in the application root.
    pub fn open_default() -> Result<Self, AppDirError> {
        let root = app_dirs::app_root_dir()?;
        let models = app_dirs::app_subdir(AppSubdir::Models)?;
        Ok(Self::open_with(root, &models))
    }

    /// Open a workspace rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let models = root.join(AppSubdir::Models.dir_name());
        Self::open_with(root, &models)
    }

    fn open_with(root: PathBuf, models_dir: &Path) -> Self {
        let labels = LabelRegistry::load(labels_path(&root));
        let settings = SettingsHandle::load(root.join(SETTINGS_FILE_NAME));
        let history = TrainingHistory::load(history_path(&root));
        let payload = PayloadOptions::from(&settings.snapshot());
        let view = |split| {
            let store = ImageStore::open(&root, split, &labels).with_payload_options(payload);
            GroupedView::new(store, &labels)
        };
        let train = view(Split::Train);
        let test = view(Split::Test);
        info!(
            "Opened workspace at {} ({} train / {} test images, {} labels)",
            root.display(),
            train.store().len(),
            test.store().len(),
            labels.len()
        );
        Self {
            model_path: model_store::model_path(models_dir),
            root,
            labels,
            settings,
            history: Arc::new(Mutex::new(history)),
            train,
            test,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn labels(&self) -> &LabelRegistry {
        &self.labels
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn history(&self) -> &Arc<Mutex<TrainingHistory>> {
        &self.history
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn view(&self, split: Split) -> &GroupedView {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    /// Validate and register a new label, creating its folders in both splits.
    pub fn add_label(&mut self, name: &str) -> LabelAddition {
        if !is_valid_label_name(name) {
            return LabelAddition::InvalidName;
        }
        if self.labels.contains(name) {
            return LabelAddition::Duplicate;
        }
        if self.labels.is_full() {
            return LabelAddition::Full;
        }
        if !self.labels.add_label(name) {
            return LabelAddition::Full;
        }
        self.train.add_label(name);
        self.test.add_label(name);
        LabelAddition::Added
    }

    pub fn add_image(&mut self, split: Split, image: &DynamicImage, label: &str) -> Option<usize> {
        let labels = &self.labels;
        match split {
            Split::Train => self.train.add(labels, image, label),
            Split::Test => self.test.add(labels, image, label),
        }
    }

    pub fn remove_image(&mut self, split: Split, label: &str, position: usize) -> Option<Example> {
        let labels = &self.labels;
        match split {
            Split::Train => self.train.remove(labels, label, position),
            Split::Test => self.test.remove(labels, label, position),
        }
    }

    /// Import the bundled seed images into both splits.
    pub fn import_builtins(&mut self, seed_root: &Path) -> usize {
        let labels = &self.labels;
        self.train.import_builtins(seed_root, labels) + self.test.import_builtins(seed_root, labels)
    }

    /// Current train/test snapshots with the slot mapping of the network.
    pub fn training_sources(&self) -> TrainingSources {
        TrainingSources {
            train: self.train.store().snapshot(),
            validation: self.test.store().snapshot(),
            mapping: self.labels.mapping(LabelSpace::Slots),
        }
    }

    /// Unshuffled, unaugmented loader for an evaluation pass.
    pub fn evaluation_loader(&self, split: Split, batch_size: usize) -> BatchLoader {
        let settings = self.settings.snapshot();
        BatchLoader::new(
            self.view(split).store().snapshot(),
            LoaderOptions {
                batch_size,
                shuffle: false,
                augment: false,
                geometry: settings.feature_geometry(),
                seed: None,
            },
        )
    }

    /// The trained model, or an untrained one over the internal slots.
    pub fn load_model(&self) -> SoftmaxClassifier {
        if self.model_path.exists() {
            match SoftmaxClassifier::load(&self.model_path) {
                Ok(model) if model.classes == self.labels.internal_slot_names() => return model,
                Ok(_) => warn!("Ignoring model with a different slot layout"),
                Err(err) => warn!("Failed to load model, starting untrained: {err}"),
            }
        }
        SoftmaxClassifier::untrained(self.labels.internal_slot_names())
    }

    /// Forget the trained model.
    pub fn reset_model(&self) -> Result<(), ModelStoreError> {
        model_store::remove(&self.model_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn add_label_reports_rejections() {
        let dir = tempdir().unwrap();
        let mut workspace = Workspace::open(dir.path());
        assert_eq!(workspace.add_label("a/b"), LabelAddition::InvalidName);
        assert_eq!(workspace.add_label("✊"), LabelAddition::Duplicate);
        assert_eq!(workspace.add_label("ok"), LabelAddition::Added);
        assert!(dir.path().join("train").join("ok").is_dir());
        assert!(dir.path().join("test").join("ok").is_dir());
        for idx in 0..6 {
            assert_eq!(workspace.add_label(&format!("g{idx}")), LabelAddition::Added);
        }
        assert_eq!(workspace.add_label("more"), LabelAddition::Full);
    }

    #[test]
    fn state_survives_reopening() {
        let dir = tempdir().unwrap();
        {
            let mut workspace = Workspace::open(dir.path());
            workspace.add_label("ok");
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 1, 1])));
            workspace.add_image(Split::Train, &image, "ok").unwrap();
            workspace.history().lock().unwrap().append(0.5, 0.4, 0.9);
        }
        let workspace = Workspace::open(dir.path());
        assert_eq!(workspace.labels().label_names().last().map(String::as_str), Some("ok"));
        assert_eq!(workspace.view(Split::Train).image_count("ok"), 1);
        assert_eq!(workspace.history().lock().unwrap().len(), 1);
    }

    #[test]
    fn untrained_model_covers_every_slot() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path());
        let model = workspace.load_model();
        assert_eq!(model.classes.len(), 10);
        workspace.reset_model().unwrap();
    }
}
