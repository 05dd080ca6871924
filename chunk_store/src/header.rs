use serde::{Deserialize, Serialize};

/// The storage type of the image tensor inside a chunk file.
///
/// Images are always handed out as `f32`, the dtype only affects the on-disk size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    #[default]
    F32,
    F16,
    U8,
}

impl Dtype {
    /// The amount of bytes a single element takes on disk.
    pub fn size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F16 => 2,
            Dtype::U8 => 1,
        }
    }
}

/// The self-describing header stored at the start of a chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChunkHeader {
    pub len: usize,
    pub shape: [usize; 3],
    pub dtype: Dtype,
    pub paths: Vec<String>,
}

impl ChunkHeader {
    /// The amount of elements of a single example, `C * H * W`.
    pub fn item_len(&self) -> usize {
        self.shape.iter().product()
    }
}
