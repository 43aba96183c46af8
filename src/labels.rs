//! Gesture label identities.
//!
//! Two label spaces coexist. *User labels* are the names shown to people: the
//! built-in gestures followed by whatever the user added, in append order.
//! *Internal slots* are the fixed output names of a trainable network
//! (`✊`, `✋`, `✌️`, `user0`, `user1`, ...). Slot `i` belongs to user label
//! `i`, so the user list is append-only: reordering or removing a label would
//! silently re-map every slot of an already trained network.
//!
//! k-NN style backends have no fixed output width and use user labels as-is.
//! Callers pick the mapping that matches their backend via [`LabelSpace`].

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::persist;

/// Labels every dataset starts with, in slot order.
pub const BUILTIN_LABELS: [&str; 3] = ["✊", "✋", "✌️"];
/// Placeholder slots reserved for user-added gestures.
pub const PLACEHOLDER_SLOTS: usize = 7;
/// Maximum number of user labels, built-ins included.
pub const MAX_LABELS: usize = BUILTIN_LABELS.len() + PLACEHOLDER_SLOTS;
/// File name of the persisted label list inside the app root.
pub const LABELS_FILE_NAME: &str = "labels.json";

const FORBIDDEN_NAME_CHARS: &[char] = &['.', '/', '\\', '?', '%', '*', '|', '"', '<', '>'];

/// Which label space a backend reports its predictions in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSpace {
    /// Fixed-width network outputs addressed by internal slot names.
    Slots,
    /// Backends whose labels are the user labels themselves.
    Direct,
}

/// Ordered user labels plus the fixed internal slot names.
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    names: Vec<String>,
    builtins: Vec<String>,
    slots: Vec<String>,
    max_labels: usize,
    path: Option<PathBuf>,
}

impl LabelRegistry {
    /// Load the persisted list from `path`, falling back to the built-ins.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut registry = Self::in_memory();
        match persist::read_json::<Vec<String>>(&path) {
            Ok(Some(names)) if registry.accepts_persisted(&names) => registry.names = names,
            Ok(Some(names)) => warn!(
                "Ignoring inconsistent label list in {} ({} entries); using built-ins",
                path.display(),
                names.len()
            ),
            Ok(None) => {}
            Err(err) => warn!("Label list unreadable, using built-ins: {err}"),
        }
        registry.path = Some(path);
        registry
    }

    /// A registry with only the built-in labels that never touches disk.
    pub fn in_memory() -> Self {
        let builtins: Vec<String> = BUILTIN_LABELS.iter().map(|name| name.to_string()).collect();
        let slots = builtins
            .iter()
            .cloned()
            .chain((0..PLACEHOLDER_SLOTS).map(|idx| format!("user{idx}")))
            .collect();
        Self {
            names: builtins.clone(),
            builtins,
            slots,
            max_labels: MAX_LABELS,
            path: None,
        }
    }

    fn accepts_persisted(&self, names: &[String]) -> bool {
        if names.len() > self.max_labels || !names.starts_with(&self.builtins) {
            return false;
        }
        let mut seen = std::collections::HashSet::new();
        names.iter().all(|name| seen.insert(name.as_str()))
    }

    /// Current user labels, built-ins first.
    pub fn label_names(&self) -> &[String] {
        &self.names
    }

    pub fn builtin_names(&self) -> &[String] {
        &self.builtins
    }

    /// Fixed internal slot names of the trainable network.
    pub fn internal_slot_names(&self) -> &[String] {
        &self.slots
    }

    pub fn max_labels(&self) -> usize {
        self.max_labels
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True once no further label can be added.
    pub fn is_full(&self) -> bool {
        self.names.len() >= self.max_labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.label_index(label).is_some()
    }

    /// Position of a user label in the ordered list.
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.names.iter().position(|name| name == label)
    }

    /// Append a new user label and persist the list.
    ///
    /// Duplicates and additions beyond capacity are ignored; callers are
    /// expected to check [`is_full`](Self::is_full) and
    /// [`is_valid_label_name`] up front. Returns whether the list changed.
    pub fn add_label(&mut self, name: &str) -> bool {
        if self.contains(name) || self.is_full() {
            return false;
        }
        self.names.push(name.to_string());
        info!("Added label {name:?} at slot {}", self.names.len() - 1);
        self.save();
        true
    }

    fn save(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(err) = persist::write_json_atomic(path, &self.names) {
            warn!("Failed to persist labels: {err}");
        }
    }

    /// Internal slot name assigned to the user label at `index`.
    pub fn internal_slot_name(&self, index: usize) -> Option<&str> {
        if index < self.names.len() {
            self.slots.get(index).map(String::as_str)
        } else {
            None
        }
    }

    /// User index bound to an internal slot, if that slot is in use.
    pub fn user_index(&self, slot: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|name| name == slot)
            .filter(|&idx| idx < self.names.len())
    }

    /// Translate a user label into the slot name the network predicts.
    pub fn to_internal_label(&self, label: &str) -> Option<&str> {
        self.label_index(label)
            .and_then(|idx| self.internal_slot_name(idx))
    }

    /// Translate a slot name back into a user label.
    ///
    /// Unused placeholders and unknown names come back unchanged so they stay
    /// displayable.
    pub fn to_user_label<'a>(&'a self, slot: &'a str) -> &'a str {
        self.user_index(slot)
            .map(|idx| self.names[idx].as_str())
            .unwrap_or(slot)
    }

    /// Immutable snapshot of the mapping for one backend kind.
    pub fn mapping(&self, space: LabelSpace) -> LabelMapping {
        LabelMapping {
            space,
            names: self.names.clone(),
            slots: self.slots.clone(),
        }
    }
}

/// Frozen user/backend label translation handed to worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMapping {
    space: LabelSpace,
    names: Vec<String>,
    slots: Vec<String>,
}

impl LabelMapping {
    pub fn space(&self) -> LabelSpace {
        self.space
    }

    /// Backend label for a user label, `None` if the label has no slot.
    pub fn to_backend<'a>(&'a self, user_label: &'a str) -> Option<&'a str> {
        match self.space {
            LabelSpace::Direct => Some(user_label),
            LabelSpace::Slots => self
                .names
                .iter()
                .position(|name| name == user_label)
                .and_then(|idx| self.slots.get(idx))
                .map(String::as_str),
        }
    }

    /// User label for a backend label, falling back to the backend name.
    pub fn to_user<'a>(&'a self, backend_label: &'a str) -> &'a str {
        match self.space {
            LabelSpace::Direct => backend_label,
            LabelSpace::Slots => self
                .slots
                .iter()
                .position(|slot| slot == backend_label)
                .and_then(|idx| self.names.get(idx))
                .map(String::as_str)
                .unwrap_or(backend_label),
        }
    }
}

/// Whether `name` is usable as a label (and therefore as a folder name).
pub fn is_valid_label_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(FORBIDDEN_NAME_CHARS)
}

/// Default location of the label list inside an app root.
pub fn labels_path(root: &Path) -> PathBuf {
    root.join(LABELS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn starts_with_builtins_and_ten_slots() {
        let registry = LabelRegistry::in_memory();
        assert_eq!(registry.label_names(), &["✊", "✋", "✌️"]);
        assert_eq!(registry.internal_slot_names().len(), 10);
        assert_eq!(registry.internal_slot_names()[3], "user0");
        assert_eq!(registry.internal_slot_names()[9], "user6");
    }

    #[test]
    fn add_label_is_idempotent() {
        let mut once = LabelRegistry::in_memory();
        once.add_label("thumbs");
        let mut twice = LabelRegistry::in_memory();
        assert!(twice.add_label("thumbs"));
        assert!(!twice.add_label("thumbs"));
        assert_eq!(once.label_names(), twice.label_names());
    }

    #[test]
    fn add_label_beyond_capacity_is_ignored() {
        let mut registry = LabelRegistry::in_memory();
        for idx in 0..PLACEHOLDER_SLOTS {
            assert!(registry.add_label(&format!("g{idx}")));
        }
        assert!(registry.is_full());
        let before = registry.label_names().to_vec();
        assert!(!registry.add_label("overflow"));
        assert_eq!(registry.label_names(), before.as_slice());
    }

    #[test]
    fn user_labels_round_trip_through_slots() {
        let mut registry = LabelRegistry::in_memory();
        registry.add_label("ok");
        registry.add_label("rock");
        for label in registry.label_names().to_vec() {
            let slot = registry.to_internal_label(&label).unwrap().to_string();
            assert_eq!(registry.to_user_label(&slot), label);
        }
        assert_eq!(registry.to_internal_label("ok"), Some("user0"));
        assert_eq!(registry.to_internal_label("rock"), Some("user1"));
    }

    #[test]
    fn unused_placeholders_stay_unchanged() {
        let mut registry = LabelRegistry::in_memory();
        registry.add_label("ok");
        assert_eq!(registry.to_user_label("user0"), "ok");
        assert_eq!(registry.to_user_label("user1"), "user1");
        assert_eq!(registry.to_user_label("mystery"), "mystery");
        assert_eq!(registry.user_index("user1"), None);
        assert_eq!(registry.internal_slot_name(4), None);
    }

    #[test]
    fn direct_mapping_passes_labels_through() {
        let mut registry = LabelRegistry::in_memory();
        registry.add_label("ok");
        let direct = registry.mapping(LabelSpace::Direct);
        assert_eq!(direct.to_backend("ok"), Some("ok"));
        assert_eq!(direct.to_user("user0"), "user0");
        let slots = registry.mapping(LabelSpace::Slots);
        assert_eq!(slots.to_backend("ok"), Some("user0"));
        assert_eq!(slots.to_backend("unknown"), None);
        assert_eq!(slots.to_user("user0"), "ok");
    }

    #[test]
    fn persists_every_addition_in_order() {
        let dir = tempdir().unwrap();
        let path = labels_path(dir.path());
        let mut registry = LabelRegistry::load(&path);
        registry.add_label("ok");
        registry.add_label("rock");

        let reloaded = LabelRegistry::load(&path);
        assert_eq!(reloaded.label_names(), &["✊", "✋", "✌️", "ok", "rock"]);
    }

    #[test]
    fn corrupt_or_inconsistent_file_falls_back_to_builtins() {
        let dir = tempdir().unwrap();
        let path = labels_path(dir.path());
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(LabelRegistry::load(&path).label_names(), &["✊", "✋", "✌️"]);

        std::fs::write(&path, r#"["ok", "✊", "✋", "✌️"]"#).unwrap();
        assert_eq!(LabelRegistry::load(&path).label_names(), &["✊", "✋", "✌️"]);
    }

    #[test]
    fn validates_label_names_for_filesystem_use() {
        assert!(is_valid_label_name("peace"));
        assert!(is_valid_label_name("🤘"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("a/b"));
        assert!(!is_valid_label_name(".."));
        assert!(!is_valid_label_name("what?"));
    }
}
