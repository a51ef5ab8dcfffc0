//! Hyperparameter selection for a new run.

use crate::models::TrainingParameters;

/// Computes the parameters for a run from the dataset size.
///
/// Caller overrides are applied on top of the result.
pub trait HyperparameterPolicy: Send + Sync {
    fn compute(&self, image_count: u32) -> TrainingParameters;
}

/// Steps scale linearly with the dataset, clamped to a sane window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultHyperparameterPolicy {
    pub steps_per_image: u32,
    pub min_steps: u32,
    pub max_steps: u32,
    pub learning_rate: f64,
}

impl Default for DefaultHyperparameterPolicy {
    fn default() -> Self {
        Self {
            steps_per_image: 100,
            min_steps: 500,
            max_steps: 3000,
            learning_rate: 1e-4,
        }
    }
}

impl HyperparameterPolicy for DefaultHyperparameterPolicy {
    fn compute(&self, image_count: u32) -> TrainingParameters {
        let steps = image_count
            .saturating_mul(self.steps_per_image)
            .clamp(self.min_steps, self.max_steps.max(self.min_steps));

        TrainingParameters {
            max_train_steps: Some(steps),
            learning_rate: Some(self.learning_rate),
            ..Default::default()
        }
    }
}
