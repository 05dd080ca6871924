use std::{
    mem,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array4, ArrayView3};

use crate::{Chunk, ChunkErr, ChunkIndex, Dtype, Result, write_chunk};

/// Splits a stream of examples into fixed-size chunk files plus their index.
///
/// Chunks are named `{split}_{n}.chunk` (1-based) and the index
/// `{split}_index.txt`, all under the same directory.
pub struct ChunkPacker {
    dir: PathBuf,
    split: String,
    chunk_size: NonZeroUsize,
    num_classes: usize,
    dtype: Dtype,

    shape: Option<[usize; 3]>,
    paths: Vec<String>,
    labels: Vec<i32>,
    images: Vec<f32>,

    chunks: Vec<String>,
    total: usize,
}

impl ChunkPacker {
    /// Creates a new `ChunkPacker`.
    ///
    /// # Arguments
    /// * `dir` - The output directory, it must exist.
    /// * `split` - The split name used as the file name prefix.
    /// * `chunk_size` - The amount of examples per chunk file.
    /// * `num_classes` - The amount of classes recorded in the index.
    /// * `dtype` - The on-disk image element type.
    pub fn new(
        dir: impl Into<PathBuf>,
        split: impl Into<String>,
        chunk_size: NonZeroUsize,
        num_classes: usize,
        dtype: Dtype,
    ) -> Self {
        Self {
            dir: dir.into(),
            split: split.into(),
            chunk_size,
            num_classes,
            dtype,
            shape: None,
            paths: Vec::with_capacity(chunk_size.get()),
            labels: Vec::with_capacity(chunk_size.get()),
            images: Vec::new(),
            chunks: Vec::new(),
            total: 0,
        }
    }

    /// The path the index will be written to on `finish`.
    pub fn index_path(&self) -> PathBuf {
        index_path(&self.dir, &self.split)
    }

    /// Appends an example, flushing a chunk file once `chunk_size` examples are buffered.
    ///
    /// # Arguments
    /// * `path` - The example's source identifier.
    /// * `image` - The example tensor, shaped `[C, H, W]`.
    /// * `label` - The example's label.
    ///
    /// # Returns
    /// `ChunkErr::InvalidChunk` if the example's shape differs from the first one pushed.
    pub fn push(&mut self, path: impl Into<String>, image: ArrayView3<f32>, label: i32) -> Result<()> {
        let dim = image.dim();
        let shape = [dim.0, dim.1, dim.2];

        match self.shape {
            None => self.shape = Some(shape),
            Some(expected) if expected != shape => {
                return Err(ChunkErr::InvalidChunk(format!(
                    "example shape {shape:?} differs from the dataset shape {expected:?}"
                )));
            }
            Some(_) => {}
        }

        self.paths.push(path.into());
        self.labels.push(label);
        self.images.extend(image.iter().copied());

        if self.labels.len() == self.chunk_size.get() {
            self.flush()?;
        }

        Ok(())
    }

    /// Flushes the remaining examples and writes the split's index.
    ///
    /// # Returns
    /// The written index.
    pub fn finish(mut self) -> Result<ChunkIndex> {
        if !self.labels.is_empty() {
            self.flush()?;
        }

        let index = ChunkIndex {
            dataset_size: self.total,
            chunk_size: self.chunk_size,
            num_classes: self.num_classes,
            chunks: mem::take(&mut self.chunks),
        };

        let path = self.index_path();
        index.write(&path)?;
        info!(
            examples = index.dataset_size, chunks = index.chunks.len();
            "wrote chunk index {}", path.display()
        );

        Ok(index)
    }

    fn flush(&mut self) -> Result<()> {
        let Some([c, h, w]) = self.shape else {
            return Ok(());
        };

        let n = self.labels.len();
        let images = Array4::from_shape_vec((n, c, h, w), mem::take(&mut self.images))
            .map_err(|e| ChunkErr::InvalidChunk(e.to_string()))?;

        let chunk = Chunk::new(
            mem::take(&mut self.paths),
            images,
            mem::take(&mut self.labels),
        )?;

        let name = format!("{}_{}.chunk", self.split, self.chunks.len() + 1);
        write_chunk(&self.dir.join(&name), &chunk, self.dtype)?;

        self.total += n;
        self.chunks.push(name);
        Ok(())
    }
}

/// The conventional index path for `split` under `dir`.
fn index_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{split}_index.txt"))
}
