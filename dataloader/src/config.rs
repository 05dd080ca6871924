use std::{num::NonZeroUsize, path::PathBuf};

use serde::Deserialize;

use crate::ImageTransformConfig;

/// The default amount of batches a prefetching worker may run ahead of the consumer.
pub const DEFAULT_PREFETCH_CAPACITY: NonZeroUsize = NonZeroUsize::new(50).unwrap();

/// Whether batches are produced inline or by a background worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prefetch {
    /// Batches are read and transformed on the consumer's thread.
    #[default]
    Off,
    /// A background worker keeps up to `capacity` finished batches ready.
    Ahead(NonZeroUsize),
}

impl Prefetch {
    /// Prefetching with the default buffer capacity.
    pub fn ahead() -> Self {
        Self::Ahead(DEFAULT_PREFETCH_CAPACITY)
    }
}

/// The options of a single pass over a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PassOptions {
    pub shuffle: bool,
    pub seed: u64,
    pub prefetch: Prefetch,
}

/// The configuration of an item-mode loader.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemLoaderConfig {
    /// The `filename,label` manifest of the split.
    pub manifest: PathBuf,
    /// The directory manifest file names are relative to.
    pub input_dir: PathBuf,
    pub batch_size: NonZeroUsize,
    pub transform: ImageTransformConfig,
}

/// The configuration of a chunk-mode loader.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkLoaderConfig {
    /// The chunk index of the split.
    pub index: PathBuf,
    /// The directory chunk file names are relative to, defaults to the index's directory.
    pub input_dir: Option<PathBuf>,
    pub batch_size: NonZeroUsize,
}
