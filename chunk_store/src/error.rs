use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The result type used in the entire chunk store module.
pub type Result<T> = std::result::Result<T, ChunkErr>;

/// The chunk store module's error type.
#[derive(Debug)]
pub enum ChunkErr {
    /// The underlying file could not be opened, read or written.
    Io { path: PathBuf, source: io::Error },
    /// The chunk file contents disagree with its own header.
    Corrupt { path: PathBuf, reason: String },
    /// The chunk index is malformed or internally inconsistent.
    InvalidIndex(String),
    /// An in-memory chunk violates the chunk invariants before being written.
    InvalidChunk(String),
}

impl ChunkErr {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Display for ChunkErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkErr::Io { path, source } => {
                write!(f, "io error on chunk '{}': {source}", path.display())
            }
            ChunkErr::Corrupt { path, reason } => {
                write!(f, "corrupt chunk '{}': {reason}", path.display())
            }
            ChunkErr::InvalidIndex(reason) => write!(f, "invalid chunk index: {reason}"),
            ChunkErr::InvalidChunk(reason) => write!(f, "invalid chunk: {reason}"),
        }
    }
}

impl Error for ChunkErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChunkErr::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
