use std::{
    cell::RefCell,
    collections::HashMap,
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process,
    rc::Rc,
};

use dataloader::{
    Batch, BatchLoader, DataErr, ImageTransformConfig, ItemLoader, ItemLoaderConfig, write_item,
};
use machine_learning::{Gradients, Params};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Ix1, Ix2, IxDyn};
use training::{
    EvalError, EvalStats, Evaluator, LoopState, TrainErr, TrainingConfig, TrainingLoop,
    TrainingObserver,
};

const CLASSES: usize = 2;
const FEATURES: usize = 4;

fn temp_dir(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = env::temp_dir().join(format!("training-loop-{}-{name}", process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes `n` linearly separable single channel 2x2 items, alternating classes.
fn loader(dir: &Path, n: usize, batch_size: usize) -> ItemLoader {
    let mut manifest = String::new();

    for i in 0..n {
        let label = i % CLASSES;
        let mut item = Array3::zeros((1, 2, 2));
        item[[0, label, label]] = 1.;

        let name = format!("{i:02}.safetensors");
        write_item(&dir.join(&name), item.view()).unwrap();
        manifest.push_str(&format!("{name},{label}\n"));
    }

    let manifest_path = dir.join("train.txt");
    fs::write(&manifest_path, manifest).unwrap();

    let mut transform = ImageTransformConfig::new(2, 2);
    transform.greyscale = true;

    ItemLoader::new(ItemLoaderConfig {
        manifest: manifest_path,
        input_dir: dir.to_path_buf(),
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        transform,
    })
    .unwrap()
}

fn zeroed_params() -> Params {
    Params::from_named([
        ("w", ArrayD::zeros(IxDyn(&[CLASSES, FEATURES]))),
        ("b", ArrayD::zeros(IxDyn(&[CLASSES]))),
    ])
    .unwrap()
}

/// A linear softmax classifier trained with cross entropy.
struct Softmax;

impl Softmax {
    fn forward(params: &Params, batch: &Batch) -> (f32, f32, Array2<f32>, Array1<f32>) {
        let n = batch.len();
        let w = params.get("w").unwrap().view().into_dimensionality::<Ix2>().unwrap();
        let b = params.get("b").unwrap().view().into_dimensionality::<Ix1>().unwrap();
        let x = batch.x.to_shape((n, FEATURES)).unwrap();

        let mut probs = x.dot(&w.t()) + &b;
        let mut loss = 0.;
        let mut correct = 0;

        for (mut row, &label) in probs.outer_iter_mut().zip(&batch.y) {
            let label = label as usize;
            let max = row.fold(f32::NEG_INFINITY, |acc, &z| acc.max(z));
            row.mapv_inplace(|z| (z - max).exp());
            let sum = row.sum();
            row /= sum;

            let predicted = (0..CLASSES)
                .max_by(|&i, &j| row[i].total_cmp(&row[j]))
                .unwrap();
            if predicted == label {
                correct += 1;
            }

            loss -= row[label].ln();
            row[label] -= 1.;
        }

        let d_logits = probs / n as f32;
        let grad_w = d_logits.t().dot(&x);
        let grad_b = d_logits.sum_axis(Axis(0));

        (loss / n as f32, correct as f32 / n as f32, grad_w, grad_b)
    }
}

impl Evaluator for Softmax {
    fn evaluate(&mut self, params: &Params, batch: &Batch) -> Result<(f32, Gradients), EvalError> {
        let (loss, _, grad_w, grad_b) = Self::forward(params, batch);

        let grads = HashMap::from([
            ("w".to_string(), grad_w.into_dyn()),
            ("b".to_string(), grad_b.into_dyn()),
        ]);

        Ok((loss, grads))
    }

    fn evaluate_no_grad(&mut self, params: &Params, batch: &Batch) -> Result<(f32, f32), EvalError> {
        let (loss, accuracy, ..) = Self::forward(params, batch);
        Ok((loss, accuracy))
    }
}

#[derive(Debug, Default)]
struct Recorded {
    states: Vec<LoopState>,
    steps: Vec<usize>,
    epoch_losses: Vec<f32>,
    validations: Vec<(usize, EvalStats)>,
    snapshots: Vec<PathBuf>,
}

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Recorded>>);

impl TrainingObserver for Recorder {
    fn on_state(&mut self, state: LoopState) {
        self.0.borrow_mut().states.push(state);
    }

    fn on_step(&mut self, step: usize, _epoch: usize, _loss: f32) {
        self.0.borrow_mut().steps.push(step);
    }

    fn on_epoch(&mut self, _epoch: usize, loss: f32) {
        self.0.borrow_mut().epoch_losses.push(loss);
    }

    fn on_validation(&mut self, step: usize, _epoch: usize, stats: &EvalStats) {
        self.0.borrow_mut().validations.push((step, *stats));
    }

    fn on_snapshot(&mut self, _step: usize, path: &Path) {
        self.0.borrow_mut().snapshots.push(path.to_path_buf());
    }
}

fn config(epochs: usize) -> TrainingConfig {
    TrainingConfig::new(NonZeroUsize::new(epochs).unwrap(), 0.5, 0.9)
}

#[test]
fn training_reduces_the_loss() {
    let dir = temp_dir("reduces-loss");
    let train = loader(&dir, 12, 4);
    let recorder = Recorder::default();

    let mut training = TrainingLoop::new(config(5), zeroed_params(), Softmax, train.clone())
        .unwrap()
        .with_validation(train)
        .with_observer(recorder.clone());

    let summary = training.run().unwrap();

    assert_eq!(summary.steps, 15);
    assert_eq!(summary.epochs, 5);
    assert_eq!(training.state(), LoopState::Done);

    let recorded = recorder.0.borrow();
    assert_eq!(recorded.steps, (1..=15).collect::<Vec<_>>());
    assert_eq!(recorded.states, [LoopState::Running, LoopState::Done]);
    assert_eq!(recorded.epoch_losses.len(), 5);
    assert!(recorded.epoch_losses[4] < recorded.epoch_losses[0]);
    drop(recorded);

    let stats = training.validate().unwrap();
    assert_eq!(stats.examples, 12);
    assert_eq!(stats.accuracy, 1.);
    assert!(stats.loss < std::f32::consts::LN_2);
}

#[test]
fn validation_runs_before_every_interval_step() {
    let dir = temp_dir("validation-interval");
    let train = loader(&dir, 12, 4);
    let recorder = Recorder::default();

    let mut config = config(5);
    config.validation_interval = 3;

    let mut training = TrainingLoop::new(config, zeroed_params(), Softmax, train.clone())
        .unwrap()
        .with_validation(train)
        .with_observer(recorder.clone());

    let summary = training.run().unwrap();

    let recorded = recorder.0.borrow();
    let steps: Vec<_> = recorded.validations.iter().map(|(step, _)| *step).collect();
    assert_eq!(steps, [0, 3, 6, 9, 12]);
    assert!(recorded.validations.iter().all(|(_, stats)| stats.examples == 12));
    assert_eq!(summary.last_validation, Some(recorded.validations[4].1));
    assert!(recorded.states.contains(&LoopState::Validating));
}

#[test]
fn snapshots_are_named_after_their_position() {
    let dir = temp_dir("snapshot-names");
    let train = loader(&dir, 12, 4);
    let snapshot_dir = dir.join("snapshots");
    let recorder = Recorder::default();

    let mut config = config(5);
    config.snapshot_interval = 5;
    config.snapshot_dir = Some(snapshot_dir.clone());

    let mut training = TrainingLoop::new(config, zeroed_params(), Softmax, train)
        .unwrap()
        .with_observer(recorder.clone());

    training.run().unwrap();

    let mut names: Vec<_> = fs::read_dir(&snapshot_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();

    assert_eq!(
        names,
        [
            "snapshot_iter0_epoch0_valna.safetensors",
            "snapshot_iter10_epoch3_valna.safetensors",
            "snapshot_iter5_epoch1_valna.safetensors",
        ]
    );
    assert_eq!(recorder.0.borrow().snapshots.len(), 3);
}

#[test]
fn restoring_a_snapshot_recovers_the_trained_state() {
    let dir = temp_dir("restore");
    let train = loader(&dir, 12, 4);

    let mut config = config(5);
    config.snapshot_dir = Some(dir.join("snapshots"));
    config.persist_velocity = true;

    let mut training =
        TrainingLoop::new(config.clone(), zeroed_params(), Softmax, train.clone()).unwrap();
    training.run().unwrap();
    let path = training.snapshot().unwrap();

    let mut restored = TrainingLoop::new(config, zeroed_params(), Softmax, train).unwrap();
    restored.restore(&path).unwrap();

    assert_eq!(restored.params(), training.params());
    assert_eq!(restored.step(), 15);
    assert_eq!(restored.epoch(), 5);

    // every epoch is already done
    let summary = restored.run().unwrap();
    assert_eq!(summary.steps, 15);
    assert_eq!(restored.params(), training.params());
}

#[test]
fn a_missing_item_aborts_the_run() {
    let dir = temp_dir("missing-item");
    let train = loader(&dir, 12, 4);
    fs::remove_file(dir.join("09.safetensors")).unwrap();

    let mut training = TrainingLoop::new(config(2), zeroed_params(), Softmax, train).unwrap();
    let err = training.run().unwrap_err();

    match err {
        TrainErr::Aborted {
            step,
            epoch,
            source,
        } => {
            assert_eq!((step, epoch), (2, 0));
            assert!(matches!(*source, TrainErr::Data(DataErr::Read { .. })), "{source}");
        }
        other => panic!("expected an aborted run, got {other}"),
    }

    assert_eq!(training.state(), LoopState::Failed);
    assert!(matches!(training.run(), Err(TrainErr::Config(_))));
}

#[test]
fn validation_interval_requires_a_validation_split() {
    let dir = temp_dir("no-validation");
    let train = loader(&dir, 4, 2);

    let mut config = config(1);
    config.validation_interval = 1;

    let mut training = TrainingLoop::new(config, zeroed_params(), Softmax, train).unwrap();

    assert!(matches!(training.run(), Err(TrainErr::Config(_))));
    assert_eq!(training.state(), LoopState::Idle);
    assert_eq!(training.step(), 0);
}

#[test]
fn test_split_is_optional() {
    let dir = temp_dir("test-split");
    let train = loader(&dir, 4, 2);

    let mut without = TrainingLoop::new(config(1), zeroed_params(), Softmax, train.clone()).unwrap();
    assert!(matches!(without.test(), Err(TrainErr::Config(_))));

    let mut with = TrainingLoop::new(config(1), zeroed_params(), Softmax, train.clone())
        .unwrap()
        .with_test(train);

    let stats = with.test().unwrap();
    assert_eq!(stats.examples, 4);
    assert!((stats.loss - std::f32::consts::LN_2).abs() < 1e-6);
}

#[test]
fn a_zero_multiplier_freezes_its_parameter() {
    let dir = temp_dir("frozen");
    let train = loader(&dir, 12, 4);
    let multipliers = dir.join("lr_mul.txt");
    fs::write(&multipliers, "w 0\nb 1\n").unwrap();

    let mut config = config(3);
    config.multipliers = Some(multipliers);

    let mut training = TrainingLoop::new(config, zeroed_params(), Softmax, train).unwrap();
    training.run().unwrap();

    assert!(training.params().get("w").unwrap().iter().all(|&v| v == 0.));
}

#[test]
fn mismatched_multiplier_names_fall_back_to_one() {
    let dir = temp_dir("mismatched-multipliers");
    let train = loader(&dir, 12, 4);
    let multipliers = dir.join("lr_mul.txt");
    fs::write(&multipliers, "weights 0\nb 1\n").unwrap();

    let mut config = config(3);
    let mut baseline =
        TrainingLoop::new(config.clone(), zeroed_params(), Softmax, train.clone()).unwrap();
    baseline.run().unwrap();

    config.multipliers = Some(multipliers);
    let mut training = TrainingLoop::new(config, zeroed_params(), Softmax, train).unwrap();
    let summary = training.run().unwrap();

    assert_eq!(summary.steps, 9);
    assert!(training.params().get("w").unwrap().iter().any(|&v| v != 0.));
    assert_eq!(training.params(), baseline.params());
}

#[test]
fn validation_weights_batches_by_their_size() {
    let dir = temp_dir("weighted-validation");
    // nine examples in batches of four leave a single class 0 example in the last batch
    let validation = loader(&dir, 9, 4);
    let whole = loader(&dir, 9, 9);

    let mut w = ArrayD::zeros(IxDyn(&[CLASSES, FEATURES]));
    w[[0, 0]] = 2.;
    let params = Params::from_named([("w", w), ("b", ArrayD::zeros(IxDyn(&[CLASSES])))]).unwrap();

    let mut training = TrainingLoop::new(config(1), params.clone(), Softmax, whole.clone())
        .unwrap()
        .with_validation(validation.clone());

    let stats = training.validate().unwrap();

    let batch = whole
        .batches(&Default::default())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let (loss, accuracy) = Softmax.evaluate_no_grad(&params, &batch).unwrap();

    assert_eq!(stats.examples, 9);
    assert!((stats.loss - loss).abs() < 1e-5, "{} != {loss}", stats.loss);
    assert!((stats.accuracy - accuracy).abs() < 1e-5);

    let batch_losses: Vec<f32> = validation
        .batches(&Default::default())
        .unwrap()
        .map(|batch| Softmax.evaluate_no_grad(&params, &batch.unwrap()).unwrap().0)
        .collect();
    let unweighted = batch_losses.iter().sum::<f32>() / batch_losses.len() as f32;
    assert!((unweighted - loss).abs() > 1e-3);
}

#[test]
fn resuming_mid_epoch_matches_an_uninterrupted_run() {
    let dir = temp_dir("resume-mid-epoch");
    let train = loader(&dir, 12, 4);

    let mut config = config(3);
    config.shuffle_train = true;
    config.seed = 11;
    config.persist_velocity = true;
    config.snapshot_interval = 4;
    config.snapshot_dir = Some(dir.join("snapshots"));

    let mut uninterrupted =
        TrainingLoop::new(config.clone(), zeroed_params(), Softmax, train.clone()).unwrap();
    uninterrupted.run().unwrap();

    // step 4 is the second batch of epoch 1
    let path = dir.join("snapshots/snapshot_iter4_epoch1_valna.safetensors");
    config.snapshot_dir = Some(dir.join("resumed"));

    let recorder = Recorder::default();
    let mut resumed = TrainingLoop::new(config, zeroed_params(), Softmax, train)
        .unwrap()
        .with_observer(recorder.clone());
    resumed.restore(&path).unwrap();

    let summary = resumed.run().unwrap();

    assert_eq!(summary.steps, 9);
    assert_eq!(recorder.0.borrow().steps, (5..=9).collect::<Vec<_>>());
    assert_eq!(resumed.params(), uninterrupted.params());
}
