use crate::{backend::ClassifierOutput, labels::LabelMapping};

/// A decided label, its confidence and the full class distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    label: String,
    confidence: f64,
    probabilities: Vec<(String, f64)>,
}

impl Prediction {
    /// Parse a backend answer.
    ///
    /// Returns `None` when the backend reported no label or the label is
    /// missing from its own distribution.
    pub fn from_output(output: ClassifierOutput) -> Option<Self> {
        let confidence = output
            .label
            .as_deref()
            .and_then(|label| output.probability_of(label))?;
        let label = output.label?;
        Some(Self {
            label,
            confidence,
            probabilities: output.probabilities,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Probability of the winning label.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn probabilities(&self) -> &[(String, f64)] {
        &self.probabilities
    }

    pub fn probability_of(&self, label: &str) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, p)| *p)
    }

    /// Distribution ordered from most to least likely.
    pub fn sorted_probabilities(&self) -> Vec<(&str, f64)> {
        let mut sorted: Vec<(&str, f64)> = self
            .probabilities
            .iter()
            .map(|(name, p)| (name.as_str(), *p))
            .collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted
    }

    /// Same prediction with backend labels replaced by user labels.
    pub fn to_user_space(&self, mapping: &LabelMapping) -> Self {
        Self {
            label: mapping.to_user(&self.label).to_string(),
            confidence: self.confidence,
            probabilities: self
                .probabilities
                .iter()
                .map(|(name, p)| (mapping.to_user(name).to_string(), *p))
                .collect(),
        }
    }
}
