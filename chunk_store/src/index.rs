use std::{
    fmt::{self, Display},
    fs,
    num::NonZeroUsize,
    path::Path,
};

use log::debug;

use crate::{ChunkErr, ChunkHandle, Result};

/// The index of a chunked dataset split.
///
/// On disk it's a text file with three header lines (`dataset_size`, `chunk_size`
/// and `num_classes`) followed by one chunk file name per line, in chunk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    pub dataset_size: usize,
    pub chunk_size: NonZeroUsize,
    pub num_classes: usize,
    pub chunks: Vec<String>,
}

impl ChunkIndex {
    /// Parses a chunk index from its textual form.
    ///
    /// # Arguments
    /// * `text` - The contents of an index file.
    ///
    /// # Returns
    /// The parsed index or `ChunkErr::InvalidIndex` if it's malformed or the amount of
    /// listed chunks doesn't match the declared totals.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim);

        let mut header = |name: &str| -> Result<usize> {
            let line = lines
                .next()
                .ok_or_else(|| ChunkErr::InvalidIndex(format!("missing header line: {name}")))?;

            line.parse::<usize>().map_err(|e| {
                ChunkErr::InvalidIndex(format!("invalid {name} '{line}': {e}"))
            })
        };

        let dataset_size = header("dataset_size")?;
        let chunk_size = header("chunk_size")?;
        let num_classes = header("num_classes")?;

        let chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| ChunkErr::InvalidIndex("chunk_size must be greater than 0".into()))?;

        let chunks: Vec<String> = lines
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        let index = Self {
            dataset_size,
            chunk_size,
            num_classes,
            chunks,
        };

        if index.chunks.len() != index.expected_chunks() {
            return Err(ChunkErr::InvalidIndex(format!(
                "{} examples in chunks of {} need {} chunk files, the index lists {}",
                index.dataset_size,
                index.chunk_size,
                index.expected_chunks(),
                index.chunks.len()
            )));
        }

        Ok(index)
    }

    /// Reads and parses the index file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ChunkErr::io(path, e))?;
        Self::parse(&text)
    }

    /// Writes the index in its textual form to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string()).map_err(|e| ChunkErr::io(path, e))
    }

    /// The amount of chunk files needed to hold `dataset_size` examples.
    pub fn expected_chunks(&self) -> usize {
        self.dataset_size.div_ceil(self.chunk_size.get())
    }

    /// Opens the header of every chunk under `dir` and checks them against the index totals.
    ///
    /// Every chunk but the last must hold exactly `chunk_size` examples, the last one at
    /// most `chunk_size`, and all of them together exactly `dataset_size`.
    ///
    /// # Arguments
    /// * `dir` - The directory the chunk file names are relative to.
    ///
    /// # Returns
    /// The length of every chunk, in order.
    pub fn verify(&self, dir: &Path) -> Result<Vec<usize>> {
        let chunk_size = self.chunk_size.get();
        let mut lens = Vec::with_capacity(self.chunks.len());

        for (i, name) in self.chunks.iter().enumerate() {
            let handle = ChunkHandle::open(&dir.join(name))?;
            let len = handle.len();
            let last = i + 1 == self.chunks.len();

            if len > chunk_size || (!last && len != chunk_size) {
                return Err(ChunkErr::InvalidIndex(format!(
                    "chunk '{name}' holds {len} examples, expected {}{chunk_size}",
                    if last { "at most " } else { "" }
                )));
            }

            lens.push(len);
        }

        let total: usize = lens.iter().sum();
        if total != self.dataset_size {
            return Err(ChunkErr::InvalidIndex(format!(
                "chunks hold {total} examples but the index declares {}",
                self.dataset_size
            )));
        }

        debug!(chunks = lens.len(), examples = total; "verified chunk index");
        Ok(lens)
    }
}

impl Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.dataset_size)?;
        writeln!(f, "{}", self.chunk_size)?;
        writeln!(f, "{}", self.num_classes)?;

        for chunk in &self.chunks {
            writeln!(f, "{chunk}")?;
        }

        Ok(())
    }
}
