//! Pre-chunked dataset storage.
//!
//! A chunk bundles a contiguous run of examples (images, labels and their
//! source paths) into a single file so that large datasets can be split into
//! manageable units. A plain-text chunk index lists the chunks of a split in
//! order together with the dataset totals.

mod chunk;
mod error;
mod header;
mod index;
mod packer;
mod reader;
mod writer;

pub use chunk::Chunk;
pub use error::{ChunkErr, Result};
pub use header::{ChunkHeader, Dtype};
pub use index::ChunkIndex;
pub use packer::ChunkPacker;
pub use reader::ChunkHandle;
pub use writer::write_chunk;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Leading bytes of every chunk file.
const MAGIC: &[u8; 8] = b"BFCHUNK1";
