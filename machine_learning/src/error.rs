use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    DuplicateParam(String),
    MissingGradient(String),
    UnknownGradient(String),
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidMultiplier {
        line: usize,
        reason: String,
    },
    SnapshotMismatch {
        got: usize,
        expected: usize,
    },
    SnapshotShapeMismatch {
        index: usize,
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    SnapshotCorrupt {
        path: PathBuf,
        reason: String,
    },
    Io {
        path: PathBuf,
        source: io::Error,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::DuplicateParam(name) => format!("The parameter '{name}' is declared twice"),
            MlErr::MissingGradient(name) => {
                format!("There's no gradient for the parameter '{name}'")
            }
            MlErr::UnknownGradient(name) => {
                format!("Got a gradient for '{name}', which is not a parameter")
            }
            MlErr::ShapeMismatch {
                name,
                got,
                expected,
            } => format!(
                "There's a shape mismatch for '{name}', got {got:?} and expected {expected:?}"
            ),
            MlErr::InvalidMultiplier { line, reason } => {
                format!("Invalid learning rate multiplier at line {line}: {reason}")
            }
            MlErr::SnapshotMismatch { got, expected } => format!(
                "The snapshot holds {got} parameters but the model has {expected}"
            ),
            MlErr::SnapshotShapeMismatch {
                index,
                name,
                got,
                expected,
            } => format!(
                "The snapshot's parameter {index} ('{name}') has shape {got:?}, expected {expected:?}"
            ),
            MlErr::SnapshotCorrupt { path, reason } => {
                format!("The snapshot '{}' is corrupt: {reason}", path.display())
            }
            MlErr::Io { path, source } => format!("Io error on '{}': {source}", path.display()),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
