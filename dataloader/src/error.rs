use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use chunk_store::ChunkErr;

/// The dataloader module's result type.
pub type Result<T> = std::result::Result<T, DataErr>;

/// Data loading failures.
#[derive(Debug)]
pub enum DataErr {
    /// A manifest, index or loader option is invalid, raised before any batch is produced.
    Config(String),
    /// A source item is missing or unreadable.
    Read { path: PathBuf, reason: String },
    /// A source item or chunk doesn't hold what it declares.
    Corrupt { path: PathBuf, reason: String },
    /// Any other io failure, such as spawning the prefetch worker or writing an export.
    Io(io::Error),
}

impl DataErr {
    pub(crate) fn read(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::Config(reason) => write!(f, "configuration error: {reason}"),
            DataErr::Read { path, reason } => {
                write!(f, "failed to read '{}': {reason}", path.display())
            }
            DataErr::Corrupt { path, reason } => {
                write!(f, "corrupt data in '{}': {reason}", path.display())
            }
            DataErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DataErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DataErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ChunkErr> for DataErr {
    fn from(value: ChunkErr) -> Self {
        match value {
            ChunkErr::Io { path, source } => Self::read(path, source),
            ChunkErr::Corrupt { path, reason } => Self::Corrupt { path, reason },
            ChunkErr::InvalidIndex(reason) => Self::Config(reason),
            ChunkErr::InvalidChunk(reason) => Self::Config(reason),
        }
    }
}
