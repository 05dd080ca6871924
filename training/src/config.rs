use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use dataloader::Prefetch;
use serde::Deserialize;

use crate::{Result, TrainErr};

/// How the learning rate evolves across epochs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LrSchedule {
    #[default]
    Constant,
    /// Multiplies the learning rate by `gamma` every `every_epochs` epochs.
    Step {
        every_epochs: NonZeroUsize,
        gamma: f32,
    },
}

impl LrSchedule {
    /// The learning rate to use during `epoch`.
    pub fn learning_rate(&self, base: f32, epoch: usize) -> f32 {
        match *self {
            LrSchedule::Constant => base,
            LrSchedule::Step {
                every_epochs,
                gamma,
            } => base * gamma.powi((epoch / every_epochs.get()) as i32),
        }
    }
}

/// The configuration of a `TrainingLoop`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub epochs: NonZeroUsize,
    pub learning_rate: f32,
    #[serde(default)]
    pub momentum: f32,
    /// Validate before every step that is a multiple of this, `0` disables validation.
    #[serde(default)]
    pub validation_interval: usize,
    /// Snapshot before every step that is a multiple of this, `0` disables snapshots.
    #[serde(default)]
    pub snapshot_interval: usize,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub shuffle_train: bool,
    /// The base shuffling seed, epoch `e` uses `seed + e`.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub prefetch: Prefetch,
    /// Store the optimizer velocity alongside the parameters in snapshots.
    #[serde(default)]
    pub persist_velocity: bool,
    #[serde(default)]
    pub lr_schedule: LrSchedule,
    /// A learning rate multiplier file, one `name value` pair per parameter.
    #[serde(default)]
    pub multipliers: Option<PathBuf>,
}

impl TrainingConfig {
    /// A configuration with every optional feature disabled.
    pub fn new(epochs: NonZeroUsize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            epochs,
            learning_rate,
            momentum,
            validation_interval: 0,
            snapshot_interval: 0,
            snapshot_dir: None,
            shuffle_train: false,
            seed: 0,
            prefetch: Prefetch::Off,
            persist_velocity: false,
            lr_schedule: LrSchedule::Constant,
            multipliers: None,
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrainErr::Config(format!("invalid training config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON configuration file at `path`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            TrainErr::Config(format!("cannot read '{}': {e}", path.display()))
        })?;

        Self::from_json(&json)
    }

    /// Checks the configuration is usable.
    ///
    /// # Returns
    /// `TrainErr::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(TrainErr::Config(reason.to_string()));

        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return invalid("learning_rate must be a positive number");
        }

        if !(0. ..1.).contains(&self.momentum) {
            return invalid("momentum must be in [0, 1)");
        }

        if self.snapshot_interval > 0 && self.snapshot_dir.is_none() {
            return invalid("snapshot_interval is set but snapshot_dir is missing");
        }

        if let LrSchedule::Step { gamma, .. } = self.lr_schedule {
            if !gamma.is_finite() || gamma <= 0. {
                return invalid("lr_schedule gamma must be a positive number");
            }
        }

        Ok(())
    }
}
