//! Classifier capabilities consumed by inference and training.
//!
//! Backends are opaque: given a [`Feature`] they report a label and a
//! probability per class. Trainable backends additionally take one optimization
//! step per labelled batch. Labels are whatever space the backend was built
//! for; callers translate through a [`LabelMapping`](crate::labels::LabelMapping).

pub mod softmax;

use std::io::Write;

use thiserror::Error;

use crate::loader::Feature;

/// Failures reported by a classifier backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Feature rejected: {0}")]
    InvalidFeature(String),
    #[error("Unknown training label {0:?}")]
    UnknownLabel(String),
    #[error("Backend failure: {0}")]
    Failed(String),
    #[error("Failed to serialize model: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write model: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw backend answer for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    /// Winning label; `None` when the backend produced no decision.
    pub label: Option<String>,
    /// Probability per class label, in backend order.
    pub probabilities: Vec<(String, f64)>,
}

impl ClassifierOutput {
    pub fn probability_of(&self, label: &str) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, p)| *p)
    }
}

/// A feature paired with its backend-space label.
#[derive(Debug, Clone, Copy)]
pub struct TrainingExample<'a> {
    pub feature: &'a Feature,
    pub label: &'a str,
}

pub trait Classifier {
    fn predict(&self, feature: &Feature) -> Result<ClassifierOutput, BackendError>;

    /// Predict several features at once, in order.
    fn predict_batch(&self, features: &[&Feature]) -> Result<Vec<ClassifierOutput>, BackendError> {
        features.iter().map(|feature| self.predict(feature)).collect()
    }
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn predict(&self, feature: &Feature) -> Result<ClassifierOutput, BackendError> {
        (**self).predict(feature)
    }

    fn predict_batch(&self, features: &[&Feature]) -> Result<Vec<ClassifierOutput>, BackendError> {
        (**self).predict_batch(features)
    }
}

/// A classifier that learns incrementally from labelled batches.
pub trait TrainableClassifier: Classifier + Clone + Send {
    /// Run one optimization step and return the batch loss.
    fn train_step(
        &mut self,
        batch: &[TrainingExample<'_>],
        learning_rate: f64,
    ) -> Result<f64, BackendError>;

    /// Called after the last batch of an epoch; backends that track their
    /// own epoch loss return it here.
    fn end_epoch(&mut self) -> Option<f64> {
        None
    }

    /// Serialize the model artifact.
    fn write_to(&self, writer: &mut dyn Write) -> Result<(), BackendError>;
}
