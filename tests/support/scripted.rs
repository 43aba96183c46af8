use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use gestures::{
    backend::{BackendError, Classifier, ClassifierOutput, TrainableClassifier, TrainingExample},
    loader::Feature,
};

/// Colour of the top-left pixel of a feature, thresholded per channel.
pub type Corner = (bool, bool, bool);

/// Trainable stub reporting a scripted loss per epoch.
#[derive(Clone, Debug, Default)]
pub struct ScriptedNet {
    epoch_losses: Vec<f64>,
    epochs_done: usize,
    pub steps: usize,
    corners: Arc<Mutex<Vec<Corner>>>,
}

impl ScriptedNet {
    pub fn with_epoch_losses(losses: &[f64]) -> Self {
        Self {
            epoch_losses: losses.to_vec(),
            ..Self::default()
        }
    }

    /// Top-left corners of every training feature seen by any clone.
    pub fn corners(&self) -> Vec<Corner> {
        self.corners.lock().unwrap().clone()
    }

    pub fn clear_corners(&self) {
        self.corners.lock().unwrap().clear();
    }
}

impl Classifier for ScriptedNet {
    fn predict(&self, _feature: &Feature) -> Result<ClassifierOutput, BackendError> {
        Ok(ClassifierOutput {
            label: Some("✊".to_string()),
            probabilities: vec![("✊".to_string(), 0.6), ("✋".to_string(), 0.4)],
        })
    }
}

impl TrainableClassifier for ScriptedNet {
    fn train_step(
        &mut self,
        batch: &[TrainingExample<'_>],
        _learning_rate: f64,
    ) -> Result<f64, BackendError> {
        self.steps += 1;
        let mut corners = self.corners.lock().unwrap();
        for example in batch {
            let (_, height, width) = example.feature.shape();
            let plane = height * width;
            let values = example.feature.as_slice();
            corners.push((values[0] > 0.5, values[plane] > 0.5, values[2 * plane] > 0.5));
        }
        Ok(1.0)
    }

    fn end_epoch(&mut self) -> Option<f64> {
        let loss = self.epoch_losses.get(self.epochs_done).copied();
        self.epochs_done += 1;
        loss
    }

    fn write_to(&self, writer: &mut dyn Write) -> Result<(), BackendError> {
        writeln!(writer, "{{\"steps\": {}}}", self.steps)?;
        Ok(())
    }
}
