use std::{
    fs,
    path::{Path, PathBuf},
};

use dataloader::{BatchLoader, PassOptions, Prefetch};
use log::info;
use machine_learning::{
    Params,
    optimization::{GradientDescentWithMomentum, LrMultipliers},
    snapshot::{self, SnapshotMeta},
};

use crate::{
    EvalStats, Evaluator, LogObserver, LoopState, Result, TrainErr, TrainingConfig,
    TrainingObserver,
};

/// The outcome of a completed training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub steps: usize,
    pub epochs: usize,
    pub last_validation: Option<EvalStats>,
}

/// Drives epochs of training steps over a batch loader.
///
/// Every step evaluates the model on one batch and applies the momentum optimizer
/// to the parameters. Before step `i` the validation split is evaluated if
/// `validation_interval` divides `i`, and a snapshot is written if
/// `snapshot_interval` does.
pub struct TrainingLoop<E> {
    config: TrainingConfig,
    params: Params,
    optimizer: GradientDescentWithMomentum,
    evaluator: E,

    train: Box<dyn BatchLoader>,
    validation: Option<Box<dyn BatchLoader>>,
    test: Option<Box<dyn BatchLoader>>,
    observer: Box<dyn TrainingObserver>,

    state: LoopState,
    step: usize,
    epoch: usize,
    /// The amount of batches of `epoch` already applied.
    batch: usize,
    last_validation: Option<EvalStats>,
}

impl<E: Evaluator> TrainingLoop<E> {
    /// Creates a new `TrainingLoop`.
    ///
    /// # Arguments
    /// * `config` - The training configuration, validated eagerly.
    /// * `params` - The initial model parameters.
    /// * `evaluator` - Computes losses and gradients for the model.
    /// * `train` - The training split.
    ///
    /// # Returns
    /// `TrainErr::Config` if the configuration is invalid, or an error if the
    /// multiplier file can't be loaded.
    pub fn new(
        config: TrainingConfig,
        params: Params,
        evaluator: E,
        train: impl BatchLoader + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let multipliers = match &config.multipliers {
            Some(path) => LrMultipliers::load(path, &params)?,
            None => LrMultipliers::default(),
        };

        Ok(Self {
            optimizer: GradientDescentWithMomentum::new(config.momentum, multipliers),
            config,
            params,
            evaluator,
            train: Box::new(train),
            validation: None,
            test: None,
            observer: Box::new(LogObserver),
            state: LoopState::Idle,
            step: 0,
            epoch: 0,
            batch: 0,
            last_validation: None,
        })
    }

    pub fn with_validation(mut self, loader: impl BatchLoader + 'static) -> Self {
        self.validation = Some(Box::new(loader));
        self
    }

    pub fn with_test(mut self, loader: impl BatchLoader + 'static) -> Self {
        self.test = Some(Box::new(loader));
        self
    }

    pub fn with_observer(mut self, observer: impl TrainingObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The amount of completed training steps.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn last_validation(&self) -> Option<EvalStats> {
        self.last_validation
    }

    /// Trains until the configured amount of epochs is completed.
    ///
    /// # Returns
    /// A summary of the run, or `TrainErr::Aborted` holding the last completed step,
    /// the epoch in progress and the failure that stopped the run.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        if self.state.is_terminal() {
            return Err(TrainErr::Config(format!(
                "the training loop is already {}",
                self.state
            )));
        }

        if self.config.validation_interval > 0 && self.validation.is_none() {
            return Err(TrainErr::Config(
                "validation_interval is set but there's no validation split".into(),
            ));
        }

        info!(
            epochs = self.config.epochs.get(), examples = self.train.len(),
            batch_size = self.train.batch_size(), params = self.params.size();
            "starting training"
        );

        self.transition(LoopState::Running);

        match self.train_epochs() {
            Ok(()) => {
                self.transition(LoopState::Done);
                Ok(TrainingSummary {
                    steps: self.step,
                    epochs: self.epoch,
                    last_validation: self.last_validation,
                })
            }
            Err(e) => {
                self.transition(LoopState::Failed);
                Err(TrainErr::Aborted {
                    step: self.step,
                    epoch: self.epoch,
                    source: Box::new(e),
                })
            }
        }
    }

    fn train_epochs(&mut self) -> Result<()> {
        while self.epoch < self.config.epochs.get() {
            let epoch = self.epoch;
            let lr = self
                .config
                .lr_schedule
                .learning_rate(self.config.learning_rate, epoch);

            let options = PassOptions {
                shuffle: self.config.shuffle_train,
                seed: self.config.seed.wrapping_add(epoch as u64),
                prefetch: self.config.prefetch,
            };

            // batches applied before a restored snapshot are read again but skipped
            let resume_at = self.batch;

            let mut epoch_stats = EvalStats::default();
            for (i, batch) in self.train.batches(&options)?.enumerate() {
                let batch = batch?.trim();
                if i < resume_at {
                    continue;
                }

                self.before_step()?;

                let (loss, grads) = self
                    .evaluator
                    .evaluate(&self.params, &batch)
                    .map_err(TrainErr::Evaluation)?;

                self.optimizer
                    .update(&mut self.params, &grads, lr, self.config.momentum)?;

                self.step += 1;
                self.batch += 1;
                epoch_stats.add(loss, 0., batch.len());
                self.observer.on_step(self.step, epoch, loss);
            }

            self.observer.on_epoch(epoch, epoch_stats.loss);
            self.epoch += 1;
            self.batch = 0;
        }

        Ok(())
    }

    fn before_step(&mut self) -> Result<()> {
        let step = self.step;
        let due = |interval: usize| interval > 0 && step % interval == 0;

        if due(self.config.validation_interval) {
            self.validate()?;
        }

        if due(self.config.snapshot_interval) {
            self.snapshot()?;
        }

        Ok(())
    }

    /// Evaluates the current parameters over the whole validation split.
    pub fn validate(&mut self) -> Result<EvalStats> {
        let previous = self.transition(LoopState::Validating);

        let result = match self.validation.as_deref() {
            Some(loader) => evaluate_split(
                loader,
                &mut self.evaluator,
                &self.params,
                self.config.prefetch,
            ),
            None => Err(TrainErr::Config("there's no validation split".into())),
        };

        self.transition(previous);
        let stats = result?;

        self.last_validation = Some(stats);
        self.observer.on_validation(self.step, self.epoch, &stats);

        Ok(stats)
    }

    /// Evaluates the current parameters over the whole test split.
    pub fn test(&mut self) -> Result<EvalStats> {
        let Some(loader) = self.test.as_deref() else {
            return Err(TrainErr::Config("there's no test split".into()));
        };

        let stats = evaluate_split(
            loader,
            &mut self.evaluator,
            &self.params,
            self.config.prefetch,
        )?;

        info!(loss = stats.loss, accuracy = stats.accuracy; "test");
        Ok(stats)
    }

    /// Writes the current parameters to `snapshot_dir`.
    ///
    /// # Returns
    /// The path of the written snapshot.
    pub fn snapshot(&mut self) -> Result<PathBuf> {
        let Some(dir) = self.config.snapshot_dir.clone() else {
            return Err(TrainErr::Config("there's no snapshot_dir".into()));
        };

        let previous = self.transition(LoopState::Snapshotting);

        let meta = SnapshotMeta {
            step: self.step,
            epoch: self.epoch,
            batch: self.batch,
            val_loss: self.last_validation.map(|stats| stats.loss),
        };

        let velocity = self
            .config
            .persist_velocity
            .then(|| self.optimizer.velocity(&self.params));

        let path = dir.join(meta.file_name());
        let result = fs::create_dir_all(&dir)
            .map_err(TrainErr::from)
            .and_then(|()| {
                snapshot::save_snapshot(&path, &self.params, velocity.as_deref(), &meta)
                    .map_err(TrainErr::from)
            });

        self.transition(previous);
        result?;

        self.observer.on_snapshot(self.step, &path);
        Ok(path)
    }

    /// Restores the parameters, the optimizer velocity if stored, and the training
    /// position from the snapshot at `path`.
    ///
    /// A following `run` resumes right after the last batch applied before the
    /// snapshot, replaying the stored epoch's iteration order up to that point.
    pub fn restore(&mut self, path: &Path) -> Result<()> {
        let snapshot = snapshot::load_snapshot(path, &mut self.params)?;

        match snapshot.velocity {
            Some(velocity) => self.optimizer.set_velocity(&self.params, velocity)?,
            None => self.optimizer.reset(),
        }

        self.step = snapshot.meta.step;
        self.epoch = snapshot.meta.epoch;
        self.batch = snapshot.meta.batch;
        Ok(())
    }

    fn transition(&mut self, state: LoopState) -> LoopState {
        let previous = self.state;

        if previous != state {
            self.state = state;
            self.observer.on_state(state);
        }

        previous
    }
}

fn evaluate_split<E: Evaluator>(
    loader: &dyn BatchLoader,
    evaluator: &mut E,
    params: &Params,
    prefetch: Prefetch,
) -> Result<EvalStats> {
    let options = PassOptions {
        shuffle: false,
        seed: 0,
        prefetch,
    };

    let mut stats = EvalStats::default();
    for batch in loader.batches(&options)? {
        let batch = batch?.trim();
        let (loss, accuracy) = evaluator
            .evaluate_no_grad(params, &batch)
            .map_err(TrainErr::Evaluation)?;

        stats.add(loss, accuracy, batch.len());
    }

    Ok(stats)
}
