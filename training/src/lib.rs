//! The training loop: epochs of optimizer steps over a batch loader,
//! interleaved with periodic validation and snapshots.

mod config;
mod error;
mod evaluator;
mod observer;
mod state;
mod trainer;

pub use config::{LrSchedule, TrainingConfig};
pub use error::{Result, TrainErr};
pub use evaluator::{EvalError, EvalStats, Evaluator};
pub use observer::{LogObserver, TrainingObserver};
pub use state::LoopState;
pub use trainer::{TrainingLoop, TrainingSummary};
