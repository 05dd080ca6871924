use ndarray::Array4;

use crate::{ChunkErr, Result};

/// An in-memory chunk, ready to be written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    paths: Vec<String>,
    images: Array4<f32>,
    labels: Vec<i32>,
}

impl Chunk {
    /// Creates a new `Chunk`.
    ///
    /// # Arguments
    /// * `paths` - The source identifier of every example.
    /// * `images` - The example tensor, shaped `[N, C, H, W]`.
    /// * `labels` - The label of every example.
    ///
    /// # Returns
    /// A new `Chunk` or `ChunkErr::InvalidChunk` if the three leading dimensions disagree
    /// or the chunk is empty.
    pub fn new(paths: Vec<String>, images: Array4<f32>, labels: Vec<i32>) -> Result<Self> {
        let n = images.shape()[0];

        if paths.len() != n || labels.len() != n {
            return Err(ChunkErr::InvalidChunk(format!(
                "paths ({}), images ({n}) and labels ({}) must share the leading dimension",
                paths.len(),
                labels.len()
            )));
        }

        if n == 0 {
            return Err(ChunkErr::InvalidChunk("a chunk can't be empty".into()));
        }

        Ok(Self {
            paths,
            images,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// The per example shape, `[C, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        let s = self.images.shape();
        [s[1], s[2], s[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_leading_dimensions_are_rejected() {
        let images = Array4::zeros((2, 1, 2, 2));
        let paths = vec!["a".to_string(), "b".to_string()];

        let err = Chunk::new(paths, images, vec![0]).unwrap_err();
        assert!(matches!(err, ChunkErr::InvalidChunk(_)));
    }

    #[test]
    fn empty_chunks_are_rejected() {
        let images = Array4::zeros((0, 1, 2, 2));
        assert!(Chunk::new(vec![], images, vec![]).is_err());
    }

    #[test]
    fn shape_excludes_the_leading_dimension() {
        let images = Array4::zeros((1, 3, 4, 5));
        let chunk = Chunk::new(vec!["a".into()], images, vec![7]).unwrap();
        assert_eq!(chunk.shape(), [3, 4, 5]);
        assert_eq!(chunk.len(), 1);
    }
}
