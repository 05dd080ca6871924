use std::path::Path;

use log::{debug, info};

use crate::{EvalStats, LoopState};

/// Receives the progress of a `TrainingLoop`.
///
/// Every method defaults to doing nothing.
pub trait TrainingObserver {
    fn on_state(&mut self, _state: LoopState) {}

    /// Called after every training step, `step` counting the completed steps.
    fn on_step(&mut self, _step: usize, _epoch: usize, _loss: f32) {}

    /// Called after every epoch with the example-weighted mean training loss.
    fn on_epoch(&mut self, _epoch: usize, _loss: f32) {}

    fn on_validation(&mut self, _step: usize, _epoch: usize, _stats: &EvalStats) {}

    fn on_snapshot(&mut self, _step: usize, _path: &Path) {}
}

/// Forwards the training progress to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl TrainingObserver for LogObserver {
    fn on_state(&mut self, state: LoopState) {
        debug!("training loop is {state}");
    }

    fn on_step(&mut self, step: usize, epoch: usize, loss: f32) {
        debug!(step = step, epoch = epoch, loss = loss; "training step");
    }

    fn on_epoch(&mut self, epoch: usize, loss: f32) {
        info!(epoch = epoch, loss = loss; "finished epoch");
    }

    fn on_validation(&mut self, step: usize, epoch: usize, stats: &EvalStats) {
        info!(
            step = step, epoch = epoch, loss = stats.loss, accuracy = stats.accuracy;
            "validation"
        );
    }

    fn on_snapshot(&mut self, step: usize, path: &Path) {
        info!(step = step; "snapshot written to {}", path.display());
    }
}
