use ndarray::{Array1, Array4, Axis, s};

/// The unit of data consumed by one optimizer step.
///
/// `x` is shaped `[n, C, H, W]`, `y` holds `n` labels and `paths` the source
/// identifier of every example. Every batch of a pass holds `batch_size` examples
/// except possibly the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array4<f32>,
    pub y: Array1<i32>,
    pub paths: Vec<String>,
}

impl Batch {
    /// The amount of examples in this batch.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Truncates `x` and `y` to the amount of examples actually yielded.
    ///
    /// Consumers that fill a pre-allocated buffer of `batch_size` rows must call
    /// this before using the batch, so padding rows never reach the model.
    pub fn trim(mut self) -> Self {
        let n = self.paths.len();

        if self.x.len_of(Axis(0)) > n {
            self.x = self.x.slice(s![..n, .., .., ..]).to_owned();
        }

        if self.y.len() > n {
            self.y = self.y.slice(s![..n]).to_owned();
        }

        self
    }
}
