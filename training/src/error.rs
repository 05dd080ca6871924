use std::{error::Error, fmt, io};

use dataloader::DataErr;
use machine_learning::MlErr;

use crate::EvalError;

/// The training module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training loop failures.
#[derive(Debug)]
pub enum TrainErr {
    Config(String),
    Data(DataErr),
    Ml(MlErr),
    Evaluation(EvalError),
    Io(io::Error),
    /// A training run stopped, `step` is the last completed step and `epoch` the
    /// epoch in progress.
    Aborted {
        step: usize,
        epoch: usize,
        source: Box<TrainErr>,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Config(reason) => write!(f, "configuration error: {reason}"),
            TrainErr::Data(e) => write!(f, "data error: {e}"),
            TrainErr::Ml(e) => write!(f, "optimization error: {e}"),
            TrainErr::Evaluation(e) => write!(f, "model evaluation failed: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Aborted {
                step,
                epoch,
                source,
            } => write!(
                f,
                "training aborted after step {step} in epoch {epoch}: {source}"
            ),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Data(e) => Some(e),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Evaluation(e) => Some(e.as_ref()),
            TrainErr::Io(e) => Some(e),
            TrainErr::Aborted { source, .. } => Some(source.as_ref()),
            TrainErr::Config(_) => None,
        }
    }
}

impl From<DataErr> for TrainErr {
    fn from(value: DataErr) -> Self {
        Self::Data(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
