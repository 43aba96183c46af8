//! Epoch-based batching over a dataset snapshot.
//!
//! A [`BatchLoader`] partitions `0..len` into batches at every
//! [`start_epoch`](BatchLoader::start_epoch) (optionally over a fresh
//! permutation), then decodes each example into a fixed-size [`Feature`] as
//! the batch is requested. Examples that fail to decode are skipped.

mod feature;

pub use feature::{Feature, FeatureError, FeatureGeometry, ScaleMode};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::warn;

use crate::dataset::DatasetSnapshot;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Examples per batch; values below 1 are treated as 1.
    pub batch_size: usize,
    pub shuffle: bool,
    /// Random horizontal and vertical flips per example.
    pub augment: bool,
    pub geometry: FeatureGeometry,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            augment: false,
            geometry: FeatureGeometry::default(),
            seed: None,
        }
    }
}

/// One decoded example together with its index in the dataset.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub index: usize,
    pub feature: Feature,
}

/// Decoded examples of one batch, in partition order.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position of this batch within the epoch.
    pub position: usize,
    pub items: Vec<BatchItem>,
    /// Examples of the partition that could not be decoded.
    pub skipped: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().map(|item| item.index)
    }
}

pub struct BatchLoader {
    snapshot: DatasetSnapshot,
    options: LoaderOptions,
    rng: StdRng,
    batches: Vec<Vec<usize>>,
    cursor: usize,
}

impl BatchLoader {
    pub fn new(snapshot: DatasetSnapshot, options: LoaderOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            snapshot,
            options,
            rng,
            batches: Vec::new(),
            cursor: 0,
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn snapshot(&self) -> &DatasetSnapshot {
        &self.snapshot
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size.max(1)
    }

    pub fn set_augment(&mut self, augment: bool) {
        self.options.augment = augment;
    }

    /// Number of examples in the source.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Stored user label of the example at `index`.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.snapshot.label(index)
    }

    /// Batches per epoch, the last one possibly shorter.
    pub fn batch_count(&self) -> usize {
        self.len().div_ceil(self.batch_size())
    }

    /// Batches handed out so far in the current epoch.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Partition the examples for a new epoch, reshuffling when enabled.
    pub fn start_epoch(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if self.options.shuffle {
            order.shuffle(&mut self.rng);
        }
        self.batches = order
            .chunks(self.batch_size())
            .map(|chunk| chunk.to_vec())
            .collect();
        self.cursor = 0;
    }

    /// Next batch of the epoch, or `None` once the epoch is exhausted.
    ///
    /// Keeps returning `None` until the next [`start_epoch`](Self::start_epoch).
    pub fn next_batch(&mut self) -> Option<Batch> {
        let indices = self.batches.get(self.cursor)?.clone();
        let position = self.cursor;
        self.cursor += 1;
        let mut items = Vec::with_capacity(indices.len());
        let mut skipped = 0;
        for index in indices {
            match self.feature_for(index) {
                Ok(feature) => items.push(BatchItem { index, feature }),
                Err(err) => {
                    warn!("Skipping example {index}: {err}");
                    skipped += 1;
                }
            }
        }
        Some(Batch {
            position,
            items,
            skipped,
        })
    }

    /// Decode, resize and (when enabled) randomly flip one example.
    pub fn feature_for(&mut self, index: usize) -> Result<Feature, FeatureError> {
        let path = self
            .snapshot
            .image_path(index)
            .ok_or(FeatureError::OutOfRange(index))?;
        let image = image::open(&path).map_err(|source| FeatureError::Decode {
            path: path.clone(),
            source,
        })?;
        let mut image = self.options.geometry.fit(&image);
        if self.options.augment {
            if self.rng.random_bool(0.5) {
                image = image.fliph();
            }
            if self.rng.random_bool(0.5) {
                image = image.flipv();
            }
        }
        Ok(Feature::from_image(&image))
    }
}
