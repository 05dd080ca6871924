use std::{
    num::NonZeroUsize,
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use chunk_store::{ChunkHandle, ChunkIndex};
use log::{debug, warn};
use ndarray::Array1;

use crate::{
    Batch, BatchLoader, Batches, ChunkLoaderConfig, DataErr, PassOptions, Prefetch, Result,
    SourceIndex, source::permutation,
};

/// A verified chunk index together with the directory holding its chunks.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    index: ChunkIndex,
    dir: PathBuf,
    lens: Vec<usize>,
    shape: [usize; 3],
}

impl ChunkSource {
    /// Loads the index at `index_path` and checks every chunk it lists.
    ///
    /// # Arguments
    /// * `index_path` - The chunk index file.
    /// * `dir` - The directory chunk names are relative to, defaults to the index's directory.
    ///
    /// # Returns
    /// `DataErr::Config` if the index disagrees with its chunks, `DataErr::Read` or
    /// `DataErr::Corrupt` if a chunk can't be opened.
    pub fn open(index_path: &Path, dir: Option<&Path>) -> Result<Self> {
        let index = ChunkIndex::load(index_path)?;
        Self::from_index(index, &chunk_dir(index_path, dir))
    }

    /// Checks every chunk listed in `index` under `dir`.
    pub fn from_index(index: ChunkIndex, dir: &Path) -> Result<Self> {
        let dir = dir.to_path_buf();
        let lens = index.verify(&dir)?;
        let shape = match index.chunks.first() {
            Some(name) => ChunkHandle::open(&dir.join(name))?.shape(),
            None => [0; 3],
        };

        Ok(Self {
            index,
            dir,
            lens,
            shape,
        })
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// The per example shape shared by every chunk, `[C, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// The length of every chunk, in index order.
    pub fn chunk_lens(&self) -> &[usize] {
        &self.lens
    }

    fn chunk_path(&self, chunk: usize) -> PathBuf {
        self.dir.join(&self.index.chunks[chunk])
    }

    /// The chunk visiting order of a pass.
    ///
    /// A trailing partial chunk is always visited last so that only the last batch
    /// of a pass can be short.
    fn chunk_order(&self, shuffle: bool, seed: u64) -> Vec<usize> {
        let n = self.lens.len();
        let partial_tail = self
            .lens
            .last()
            .is_some_and(|&len| len < self.index.chunk_size.get());

        if !partial_tail {
            return permutation(n, shuffle, seed);
        }

        let mut order = permutation(n - 1, shuffle, seed);
        order.push(n - 1);
        order
    }
}

impl SourceIndex for ChunkSource {
    fn size(&self) -> usize {
        self.index.dataset_size
    }

    fn num_classes(&self) -> usize {
        self.index.num_classes
    }

    /// The row order a chunk-mode pass delivers: the chunk visiting order, each
    /// chunk expanded into its rows in stored order.
    fn iteration_order(&self, shuffle: bool, seed: u64) -> Vec<usize> {
        let offsets: Vec<usize> = self
            .lens
            .iter()
            .scan(0, |offset, &len| {
                let start = *offset;
                *offset += len;
                Some(start)
            })
            .collect();

        self.chunk_order(shuffle, seed)
            .into_iter()
            .flat_map(|chunk| offsets[chunk]..offsets[chunk] + self.lens[chunk])
            .collect()
    }
}

/// The synchronous producer of a chunk-mode pass.
///
/// Keeps at most one chunk open and reads one batch worth of rows at a time.
pub(crate) struct ChunkBatches {
    source: Arc<ChunkSource>,
    batch_size: usize,
    order: Vec<usize>,
    next_chunk: usize,
    current: Option<(ChunkHandle, usize)>,
}

impl ChunkBatches {
    fn open_next(&mut self) -> Option<Result<()>> {
        let &chunk = self.order.get(self.next_chunk)?;
        self.next_chunk += 1;

        Some(self.open(chunk))
    }

    fn open(&mut self, chunk: usize) -> Result<()> {
        let path = self.source.chunk_path(chunk);
        let handle = ChunkHandle::open(&path)?;

        if handle.len() != self.source.lens[chunk] {
            return Err(DataErr::corrupt(
                &path,
                format!(
                    "holds {} examples, {} when the pass started",
                    handle.len(),
                    self.source.lens[chunk]
                ),
            ));
        }

        if handle.shape() != self.source.shape {
            return Err(DataErr::corrupt(
                &path,
                format!(
                    "example shape {:?} differs from the dataset shape {:?}",
                    handle.shape(),
                    self.source.shape
                ),
            ));
        }

        debug!(chunk = chunk, examples = handle.len(); "opened chunk {}", path.display());
        self.current = Some((handle, 0));
        Ok(())
    }
}

impl Iterator for ChunkBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((handle, row)) = &mut self.current {
                if *row < handle.len() {
                    let range = *row..(*row + self.batch_size).min(handle.len());
                    *row = range.end;

                    return Some(read_batch(handle, range));
                }

                if let Some((handle, _)) = self.current.take() {
                    handle.close();
                }
            }

            if let Err(e) = self.open_next()? {
                return Some(Err(e));
            }
        }
    }
}

fn read_batch(handle: &mut ChunkHandle, range: Range<usize>) -> Result<Batch> {
    let x = handle.images(range.clone())?;
    let y = handle.labels(range.clone())?;
    let paths = handle.paths()[range].to_vec();

    Ok(Batch {
        x,
        y: Array1::from(y),
        paths,
    })
}

/// Loads batches by slicing pre-built chunks, without any per example transform.
#[derive(Debug, Clone)]
pub struct ChunkLoader {
    source: Arc<ChunkSource>,
    batch_size: NonZeroUsize,
}

impl ChunkLoader {
    /// Creates a new `ChunkLoader`, verifying the index and its chunks eagerly.
    ///
    /// # Returns
    /// `DataErr::Config` if `chunk_size` isn't a multiple of `batch_size` or the index
    /// disagrees with its chunks.
    pub fn new(config: ChunkLoaderConfig) -> Result<Self> {
        let index = ChunkIndex::load(&config.index)?;
        check_alignment(&index, config.batch_size)?;

        let dir = chunk_dir(&config.index, config.input_dir.as_deref());
        let source = ChunkSource::from_index(index, &dir)?;

        Ok(Self {
            source: Arc::new(source),
            batch_size: config.batch_size,
        })
    }

    /// Creates a new `ChunkLoader` over an already opened source.
    pub fn from_source(source: ChunkSource, batch_size: NonZeroUsize) -> Result<Self> {
        check_alignment(&source.index, batch_size)?;

        Ok(Self {
            source: Arc::new(source),
            batch_size,
        })
    }

    pub fn source(&self) -> &ChunkSource {
        &self.source
    }
}

fn chunk_dir(index_path: &Path, dir: Option<&Path>) -> PathBuf {
    match dir {
        Some(dir) => dir.to_path_buf(),
        None => index_path.parent().unwrap_or(Path::new(".")).to_path_buf(),
    }
}

fn check_alignment(index: &ChunkIndex, batch_size: NonZeroUsize) -> Result<()> {
    if index.chunk_size.get() % batch_size.get() != 0 {
        return Err(DataErr::Config(format!(
            "chunk size {} is not a multiple of the batch size {batch_size}",
            index.chunk_size
        )));
    }

    Ok(())
}

impl BatchLoader for ChunkLoader {
    fn len(&self) -> usize {
        self.source.size()
    }

    fn num_classes(&self) -> usize {
        self.source.num_classes()
    }

    fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    fn batches(&self, options: &PassOptions) -> Result<Batches> {
        if let Prefetch::Ahead(_) = options.prefetch {
            warn!("prefetching is not supported in chunk mode, loading synchronously");
        }

        let order = self.source.chunk_order(options.shuffle, options.seed);
        debug!(
            chunks = order.len(), batch_size = self.batch_size(), shuffle = options.shuffle;
            "starting chunk pass"
        );

        Ok(Batches::chunks(ChunkBatches {
            source: Arc::clone(&self.source),
            batch_size: self.batch_size.get(),
            order,
            next_chunk: 0,
            current: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(dataset_size: usize, chunk_size: usize) -> ChunkIndex {
        let chunk_size = NonZeroUsize::new(chunk_size).unwrap();
        let n = dataset_size.div_ceil(chunk_size.get());

        ChunkIndex {
            dataset_size,
            chunk_size,
            num_classes: 2,
            chunks: (1..=n).map(|i| format!("train_{i}.chunk")).collect(),
        }
    }

    fn source(dataset_size: usize, chunk_size: usize) -> ChunkSource {
        let index = index(dataset_size, chunk_size);
        let lens = (0..index.chunks.len())
            .map(|i| (dataset_size - i * chunk_size).min(chunk_size))
            .collect();

        ChunkSource {
            index,
            dir: PathBuf::new(),
            lens,
            shape: [1, 1, 1],
        }
    }

    #[test]
    fn misaligned_batch_sizes_are_rejected() {
        let index = index(1000, 500);

        assert!(check_alignment(&index, NonZeroUsize::new(250).unwrap()).is_ok());
        assert!(matches!(
            check_alignment(&index, NonZeroUsize::new(300).unwrap()),
            Err(DataErr::Config(_))
        ));
    }

    #[test]
    fn partial_chunk_is_always_visited_last() {
        let source = source(950, 100);

        for seed in 0..10 {
            let order = source.chunk_order(true, seed);
            assert_eq!(order.len(), 10);
            assert_eq!(order.last(), Some(&9));
        }
    }

    #[test]
    fn iteration_order_expands_chunks_into_rows() {
        let source = source(10, 4);

        assert_eq!(source.iteration_order(false, 0), (0..10).collect::<Vec<_>>());

        let order = source.iteration_order(true, 7);
        assert_eq!(order.len(), 10);
        assert_eq!(&order[8..], [8, 9]);
        for chunk in order[..8].chunks(4) {
            assert_eq!(chunk[0] % 4, 0);
            assert_eq!(chunk.to_vec(), (chunk[0]..chunk[0] + 4).collect::<Vec<_>>());
        }
    }

    #[test]
    fn chunk_order_is_identity_without_shuffle() {
        let source = source(1000, 250);
        assert_eq!(source.chunk_order(false, 7), vec![0, 1, 2, 3]);
    }
}
