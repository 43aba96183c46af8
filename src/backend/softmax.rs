//! Linear softmax classifier over pooled colour features.

use std::{fs, io::Write, path::Path};

use serde::{Deserialize, Serialize};

use super::{BackendError, Classifier, ClassifierOutput, TrainableClassifier, TrainingExample};
use crate::loader::Feature;

/// Cells per side of the average-pooling grid.
pub const DEFAULT_POOL_GRID: usize = 4;
const MODEL_VERSION: i64 = 1;

/// Versioned weights of the reference gesture classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxClassifier {
    pub model_version: i64,
    pub classes: Vec<String>,
    pub pool_grid: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl SoftmaxClassifier {
    /// Zero-initialized model with one output per class.
    pub fn untrained(classes: &[String]) -> Self {
        let dim = input_dim(DEFAULT_POOL_GRID);
        Self {
            model_version: MODEL_VERSION,
            classes: classes.to_vec(),
            pool_grid: DEFAULT_POOL_GRID,
            weights: vec![0.0; classes.len() * dim],
            bias: vec![0.0; classes.len()],
        }
    }

    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let bytes = fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        model.validate()?;
        Ok(model)
    }

    /// Validate the model dimensions.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.classes.is_empty() {
            return Err(BackendError::Failed("No classes defined".to_string()));
        }
        if self.pool_grid == 0 {
            return Err(BackendError::Failed("pool_grid must be > 0".to_string()));
        }
        if self.weights.len() != self.classes.len() * input_dim(self.pool_grid) {
            return Err(BackendError::Failed("weights length mismatch".to_string()));
        }
        if self.bias.len() != self.classes.len() {
            return Err(BackendError::Failed("bias length mismatch".to_string()));
        }
        Ok(())
    }

    fn class_index(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|class| class == label)
    }

    fn probabilities(&self, input: &[f32]) -> Vec<f32> {
        let dim = input.len();
        let logits: Vec<f32> = (0..self.classes.len())
            .map(|c| {
                let row = &self.weights[c * dim..(c + 1) * dim];
                self.bias[c] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>()
            })
            .collect();
        softmax(&logits)
    }
}

impl Classifier for SoftmaxClassifier {
    fn predict(&self, feature: &Feature) -> Result<ClassifierOutput, BackendError> {
        let input = pooled(feature, self.pool_grid)?;
        let probs = self.probabilities(&input);
        let label = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| self.classes[idx].clone());
        Ok(ClassifierOutput {
            label,
            probabilities: self
                .classes
                .iter()
                .cloned()
                .zip(probs.into_iter().map(f64::from))
                .collect(),
        })
    }
}

impl TrainableClassifier for SoftmaxClassifier {
    fn train_step(
        &mut self,
        batch: &[TrainingExample<'_>],
        learning_rate: f64,
    ) -> Result<f64, BackendError> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        let dim = input_dim(self.pool_grid);
        let mut grad_w = vec![0.0f32; self.weights.len()];
        let mut grad_b = vec![0.0f32; self.bias.len()];
        let mut loss = 0.0f64;
        for example in batch {
            let target = self
                .class_index(example.label)
                .ok_or_else(|| BackendError::UnknownLabel(example.label.to_string()))?;
            let input = pooled(example.feature, self.pool_grid)?;
            let probs = self.probabilities(&input);
            loss -= (f64::from(probs[target]) + 1e-12).ln();
            for (c, p) in probs.iter().enumerate() {
                let diff = p - if c == target { 1.0 } else { 0.0 };
                let row = &mut grad_w[c * dim..(c + 1) * dim];
                for (g, x) in row.iter_mut().zip(&input) {
                    *g += diff * x;
                }
                grad_b[c] += diff;
            }
        }
        let scale = learning_rate as f32 / batch.len() as f32;
        for (w, g) in self.weights.iter_mut().zip(&grad_w) {
            *w -= scale * g;
        }
        for (b, g) in self.bias.iter_mut().zip(&grad_b) {
            *b -= scale * g;
        }
        Ok(loss / batch.len() as f64)
    }

    fn write_to(&self, writer: &mut dyn Write) -> Result<(), BackendError> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

fn input_dim(grid: usize) -> usize {
    Feature::CHANNELS * grid * grid
}

/// Average each channel over a `grid` x `grid` partition of the image.
fn pooled(feature: &Feature, grid: usize) -> Result<Vec<f32>, BackendError> {
    let (channels, height, width) = feature.shape();
    if width == 0 || height == 0 {
        return Err(BackendError::InvalidFeature("empty feature".to_string()));
    }
    let values = feature.as_slice();
    let plane = width * height;
    let mut sums = vec![0.0f32; channels * grid * grid];
    let mut counts = vec![0u32; grid * grid];
    for y in 0..height {
        let cy = y * grid / height;
        for x in 0..width {
            let cell = cy * grid + x * grid / width;
            counts[cell] += 1;
            for c in 0..channels {
                sums[c * grid * grid + cell] += values[c * plane + y * width + x];
            }
        }
    }
    for c in 0..channels {
        for (cell, count) in counts.iter().enumerate() {
            if *count > 0 {
                sums[c * grid * grid + cell] /= *count as f32;
            }
        }
    }
    Ok(sums)
}

fn softmax(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        return vec![1.0 / raw.len() as f32; raw.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
