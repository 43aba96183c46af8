use std::collections::HashMap;

use image::DynamicImage;

use super::{Example, ImageStore};
use crate::labels::LabelRegistry;

/// Store indices partitioned by label.
///
/// Adds append to the tail of a group because new examples always land at
/// the end of the store. Removals renumber every later example, so they
/// rebuild the whole partition.
#[derive(Debug, Clone)]
pub struct GroupedView {
    store: ImageStore,
    order: Vec<String>,
    groups: HashMap<String, Vec<usize>>,
}

impl GroupedView {
    pub fn new(store: ImageStore, labels: &LabelRegistry) -> Self {
        let mut view = Self {
            store,
            order: Vec::new(),
            groups: HashMap::new(),
        };
        view.rebuild(labels);
        view
    }

    /// Read access to the backing store.
    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn into_store(self) -> ImageStore {
        self.store
    }

    /// Recompute the partition from the backing store.
    pub fn rebuild(&mut self, labels: &LabelRegistry) {
        self.order = labels.label_names().to_vec();
        self.groups = self
            .order
            .iter()
            .map(|label| (label.clone(), Vec::new()))
            .collect();
        for (index, example) in self.store.examples().iter().enumerate() {
            self.groups
                .entry(example.label.clone())
                .or_default()
                .push(index);
        }
    }

    /// Rescan the folders (after bulk changes on disk) and rebuild.
    pub fn rescan(&mut self, labels: &LabelRegistry) {
        self.store.scan(labels);
        self.rebuild(labels);
    }

    /// Register a label added after the last rebuild.
    pub fn add_label(&mut self, label: &str) {
        self.store.create_label_folder(label);
        if !self.groups.contains_key(label) {
            self.order.push(label.to_string());
            self.groups.insert(label.to_string(), Vec::new());
        }
    }

    pub fn label_count(&self) -> usize {
        self.order.len()
    }

    pub fn label_name(&self, group: usize) -> Option<&str> {
        self.order.get(group).map(String::as_str)
    }

    pub fn image_count(&self, label: &str) -> usize {
        self.indices(label).len()
    }

    /// Store indices of `label`, in store order.
    pub fn indices(&self, label: &str) -> &[usize] {
        self.groups.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Store-wide index of the `position`-th image of `label`.
    pub fn flat_index(&self, label: &str, position: usize) -> Option<usize> {
        self.indices(label).get(position).copied()
    }

    pub fn image(&self, label: &str, position: usize) -> Option<DynamicImage> {
        self.flat_index(label, position)
            .and_then(|index| self.store.load_image(index))
    }

    /// Add through the store and append the new index to its group.
    pub fn add(
        &mut self,
        labels: &LabelRegistry,
        image: &DynamicImage,
        label: &str,
    ) -> Option<usize> {
        let index = self.store.add(labels, image, label)?;
        if !self.groups.contains_key(label) {
            self.order.push(label.to_string());
        }
        self.groups.entry(label.to_string()).or_default().push(index);
        Some(index)
    }

    /// Remove the `position`-th image of `label` and rebuild every group.
    pub fn remove(
        &mut self,
        labels: &LabelRegistry,
        label: &str,
        position: usize,
    ) -> Option<Example> {
        let index = self.flat_index(label, position)?;
        let removed = self.store.remove(index)?;
        self.rebuild(labels);
        Some(removed)
    }

    /// Import the bundled seed set and rebuild.
    pub fn import_builtins(
        &mut self,
        seed_root: &std::path::Path,
        labels: &LabelRegistry,
    ) -> usize {
        let imported = self.store.import_builtins(seed_root, labels);
        self.rebuild(labels);
        imported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Split;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn pixel(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([value, value, value])))
    }

    fn view(dir: &std::path::Path, labels: &LabelRegistry) -> GroupedView {
        GroupedView::new(ImageStore::open(dir, Split::Train, labels), labels)
    }

    #[test]
    fn flat_index_tracks_interleaved_adds() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut view = view(dir.path(), &labels);
        let sequence = ["✊", "✋", "✊", "✌️", "✋", "✊"];
        for (value, label) in sequence.iter().enumerate() {
            view.add(&labels, &pixel(value as u8), label).unwrap();
        }

        for label in ["✊", "✋", "✌️"] {
            for position in 0..view.image_count(label) {
                let index = view.flat_index(label, position).unwrap();
                assert_eq!(view.store().label(index), Some(label));
            }
        }
        assert_eq!(view.indices("✊"), &[0, 2, 5]);
        assert_eq!(view.flat_index("✌️", 1), None);
    }

    #[test]
    fn remove_rebuilds_shifted_indices() {
        let dir = tempdir().unwrap();
        let labels = LabelRegistry::in_memory();
        let mut view = view(dir.path(), &labels);
        for label in ["✊", "✋", "✊", "✋"] {
            view.add(&labels, &pixel(1), label).unwrap();
        }
        let second_fist = view.store().example(2).unwrap().id.clone();

        let removed = view.remove(&labels, "✊", 0).unwrap();

        assert_eq!(removed.label, "✊");
        assert_eq!(view.indices("✊"), &[1]);
        assert_eq!(view.indices("✋"), &[0, 2]);
        let index = view.flat_index("✊", 0).unwrap();
        assert_eq!(view.store().example(index).unwrap().id, second_fist);
    }

    #[test]
    fn groups_follow_registry_order_and_new_labels() {
        let dir = tempdir().unwrap();
        let mut labels = LabelRegistry::in_memory();
        let mut view = view(dir.path(), &labels);
        assert_eq!(view.label_count(), 3);

        labels.add_label("ok");
        view.add_label("ok");
        view.add(&labels, &pixel(3), "ok").unwrap();

        assert_eq!(view.label_name(3), Some("ok"));
        assert_eq!(view.image_count("ok"), 1);
        assert!(view.image("ok", 0).is_some());
        assert!(view.image("ok", 1).is_none());
    }
}
