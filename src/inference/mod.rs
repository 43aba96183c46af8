//! Prediction, full-pass inference and evaluation over a batch loader.
//!
//! Backends answer in their own label space. [`InferenceEngine::predict`]
//! returns those raw answers, [`InferenceEngine::run_full`] reports user
//! labels, and [`InferenceEngine::evaluate`] compares in backend space after
//! translating each stored label through the engine's [`LabelMapping`].

mod prediction;

pub use prediction::Prediction;

use tracing::{debug, info, warn};

use crate::{
    backend::Classifier,
    cancel::CancelToken,
    labels::LabelMapping,
    loader::{Batch, BatchLoader, Feature},
};

/// Added to every true-class probability before taking the logarithm.
pub const LOSS_EPSILON: f64 = 1e-100;

/// Ordered progress of one full pass.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceEvent {
    /// A batch (or single example) is about to be predicted.
    UnitBegin { position: usize, total: usize },
    /// Predictions of a unit, aligned with the dataset indices they belong to.
    UnitEnd {
        position: usize,
        indices: Vec<usize>,
        predictions: Vec<Prediction>,
    },
    Completed,
    Cancelled,
}

/// Terminal outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Aggregate metrics of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    /// Mean cross-entropy of the true labels over `evaluated` examples.
    pub loss: f64,
    /// `correct / evaluated`. Examples that failed to decode or predict are
    /// excluded, so this is not divided by the loader length.
    pub accuracy: f64,
    /// Examples that produced a prediction.
    pub evaluated: usize,
    pub correct: usize,
}

pub struct InferenceEngine<C> {
    classifier: C,
    mapping: LabelMapping,
    cancel: CancelToken,
}

impl<C: Classifier> InferenceEngine<C> {
    pub fn new(classifier: C, mapping: LabelMapping) -> Self {
        Self {
            classifier,
            mapping,
            cancel: CancelToken::new(),
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn into_classifier(self) -> C {
        self.classifier
    }

    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    /// Handle for cancelling from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request that the current pass stops at the next unit boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Re-arm the engine after a cancelled pass.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// Predict one feature; any backend failure yields `None`.
    pub fn predict(&self, feature: &Feature) -> Option<Prediction> {
        match self.classifier.predict(feature) {
            Ok(output) => {
                let parsed = Prediction::from_output(output);
                if parsed.is_none() {
                    debug!("Backend answer carried no usable label");
                }
                parsed
            }
            Err(err) => {
                warn!("Prediction failed: {err}");
                None
            }
        }
    }

    /// Predict several features; `None` unless every answer parses.
    pub fn predict_batch(&self, features: &[&Feature]) -> Option<Vec<Prediction>> {
        let outputs = match self.classifier.predict_batch(features) {
            Ok(outputs) => outputs,
            Err(err) => {
                warn!("Batch prediction failed: {err}");
                return None;
            }
        };
        if outputs.len() != features.len() {
            warn!(
                "Backend returned {} answers for {} features",
                outputs.len(),
                features.len()
            );
            return None;
        }
        outputs.into_iter().map(Prediction::from_output).collect()
    }

    /// Drive `loader` through a whole epoch, reporting user-label predictions.
    ///
    /// A loader with batch size 1 is driven example by example through
    /// [`predict`](Self::predict); larger batches go through
    /// [`predict_batch`](Self::predict_batch). Units whose prediction fails get
    /// a begin event but no end event.
    pub fn run_full(
        &self,
        loader: &mut BatchLoader,
        mut on_event: impl FnMut(InferenceEvent),
    ) -> RunOutcome {
        self.drive(loader, |event| match event {
            InferenceEvent::UnitEnd {
                position,
                indices,
                predictions,
            } => on_event(InferenceEvent::UnitEnd {
                position,
                indices,
                predictions: predictions
                    .iter()
                    .map(|prediction| prediction.to_user_space(&self.mapping))
                    .collect(),
            }),
            other => on_event(other),
        })
    }

    /// Mean loss and accuracy of the backend on `loader`.
    ///
    /// Returns all zeros for an empty loader or a cancelled pass.
    pub fn evaluate(&self, loader: &mut BatchLoader) -> Evaluation {
        let snapshot = loader.snapshot().clone();
        let mut loss_sum = 0.0f64;
        let mut evaluated = 0usize;
        let mut correct = 0usize;
        let outcome = self.drive(loader, |event| {
            let InferenceEvent::UnitEnd {
                indices,
                predictions,
                ..
            } = event
            else {
                return;
            };
            for (index, prediction) in indices.into_iter().zip(predictions) {
                let Some(user_label) = snapshot.label(index) else {
                    continue;
                };
                let truth = self.mapping.to_backend(user_label);
                let p_true = truth
                    .and_then(|label| prediction.probability_of(label))
                    .unwrap_or(0.0);
                loss_sum -= (p_true + LOSS_EPSILON).ln();
                if truth == Some(prediction.label()) {
                    correct += 1;
                }
                evaluated += 1;
            }
        });
        if outcome == RunOutcome::Cancelled || evaluated == 0 {
            return Evaluation::default();
        }
        let evaluation = Evaluation {
            loss: loss_sum / evaluated as f64,
            accuracy: correct as f64 / evaluated as f64,
            evaluated,
            correct,
        };
        info!(
            "Evaluated {evaluated} {} examples: loss {:.4}, accuracy {:.2}%",
            snapshot.split(),
            evaluation.loss,
            evaluation.accuracy * 100.0
        );
        evaluation
    }

    /// Shared pass loop reporting backend-space predictions.
    fn drive(
        &self,
        loader: &mut BatchLoader,
        mut on_event: impl FnMut(InferenceEvent),
    ) -> RunOutcome {
        let per_example = loader.batch_size() == 1;
        loader.start_epoch();
        let total = loader.batch_count();
        loop {
            if self.cancel.is_cancelled() {
                info!("Inference pass cancelled at unit {}", loader.position());
                on_event(InferenceEvent::Cancelled);
                return RunOutcome::Cancelled;
            }
            let Some(batch) = loader.next_batch() else {
                break;
            };
            let position = batch.position;
            on_event(InferenceEvent::UnitBegin { position, total });
            if let Some((indices, predictions)) = self.predict_unit(&batch, per_example) {
                on_event(InferenceEvent::UnitEnd {
                    position,
                    indices,
                    predictions,
                });
            }
        }
        on_event(InferenceEvent::Completed);
        RunOutcome::Completed
    }

    fn predict_unit(
        &self,
        batch: &Batch,
        per_example: bool,
    ) -> Option<(Vec<usize>, Vec<Prediction>)> {
        if batch.is_empty() {
            return None;
        }
        let indices: Vec<usize> = batch.indices().collect();
        let predictions = if per_example {
            batch
                .items
                .iter()
                .map(|item| self.predict(&item.feature))
                .collect::<Option<Vec<_>>>()?
        } else {
            let features: Vec<&Feature> = batch.items.iter().map(|item| &item.feature).collect();
            self.predict_batch(&features)?
        };
        Some((indices, predictions))
    }
}
