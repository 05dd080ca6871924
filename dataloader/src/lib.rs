//! Batch loading over disk-resident datasets.
//!
//! Two storage layouts are supported behind the same `BatchLoader` contract:
//! individual item files listed in a `filename,label` manifest, and pre-built
//! chunk files listed in a chunk index. Item-mode passes can be prefetched by a
//! background worker through a bounded buffer.

mod batch;
mod chunks;
mod config;
mod error;
mod export;
mod items;
mod loader;
mod manifest;
mod prefetch;
mod source;
mod transform;

pub use batch::Batch;
pub use chunks::{ChunkLoader, ChunkSource};
pub use config::{ChunkLoaderConfig, DEFAULT_PREFETCH_CAPACITY, ItemLoaderConfig, PassOptions, Prefetch};
pub use error::{DataErr, Result};
pub use export::{ExportOptions, ExportSummary, OutputFormat, export_split, write_item};
pub use items::ItemLoader;
pub use loader::{BatchLoader, Batches};
pub use manifest::{Manifest, ManifestEntry};
pub use source::{SourceIndex, permutation};
pub use transform::{ITEM_TENSOR, ImageTransform, ImageTransformConfig};
