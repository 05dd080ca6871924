use std::error::Error;

use dataloader::Batch;
use machine_learning::{Gradients, Params};

/// The error type of a model evaluation.
pub type EvalError = Box<dyn Error + Send + Sync>;

/// The model evaluation collaborator of a `TrainingLoop`.
///
/// Losses and accuracies are averages over the examples of the given batch.
pub trait Evaluator {
    /// Computes the loss of `batch` and the gradient of every parameter.
    fn evaluate(&mut self, params: &Params, batch: &Batch)
    -> Result<(f32, Gradients), EvalError>;

    /// Computes the loss and accuracy of `batch`, without gradients.
    fn evaluate_no_grad(&mut self, params: &Params, batch: &Batch) -> Result<(f32, f32), EvalError>;
}

/// Aggregated loss and accuracy over a full pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalStats {
    pub loss: f32,
    pub accuracy: f32,
    /// The amount of examples the averages were taken over.
    pub examples: usize,
}

impl EvalStats {
    /// Folds the averages of a batch of `n` examples into these stats.
    pub(crate) fn add(&mut self, loss: f32, accuracy: f32, n: usize) {
        let total = self.examples + n;
        if total == 0 {
            return;
        }

        let (old, new) = (self.examples as f32, n as f32);
        self.loss = (self.loss * old + loss * new) / total as f32;
        self.accuracy = (self.accuracy * old + accuracy * new) / total as f32;
        self.examples = total;
    }
}
