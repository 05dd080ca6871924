use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
};

use half::f16;
use ndarray::Array4;

use crate::{ChunkErr, ChunkHeader, Dtype, LEN_TYPE_SIZE, LenType, MAGIC, Result};

/// A read-only handle over a single chunk file.
///
/// Rows can be read in any order within the chunk, each read only touches the
/// requested rows of the file.
#[derive(Debug)]
pub struct ChunkHandle {
    path: PathBuf,
    file: File,
    header: ChunkHeader,
    labels_offset: u64,
    images_offset: u64,
}

impl ChunkHandle {
    /// Opens the chunk file at `path` and validates its header against the file size.
    ///
    /// # Arguments
    /// * `path` - The chunk file to open.
    ///
    /// # Returns
    /// A new `ChunkHandle`, `ChunkErr::Io` if the file can't be read or `ChunkErr::Corrupt`
    /// if the declared counts disagree with the actual contents.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| ChunkErr::io(path, e))?;
        let file_len = file.metadata().map_err(|e| ChunkErr::io(path, e))?.len();

        let mut magic = [0u8; 8];
        read_exact(path, &mut file, &mut magic)?;
        if &magic != MAGIC {
            return Err(ChunkErr::corrupt(path, "not a chunk file, bad magic bytes"));
        }

        let mut len_buf = [0u8; LEN_TYPE_SIZE];
        read_exact(path, &mut file, &mut len_buf)?;
        let header_len = LenType::from_le_bytes(len_buf);

        let preamble = (MAGIC.len() + LEN_TYPE_SIZE) as u64;
        if header_len > file_len.saturating_sub(preamble) {
            return Err(ChunkErr::corrupt(
                path,
                format!("header length {header_len} exceeds the file size {file_len}"),
            ));
        }

        let mut header_buf = vec![0; header_len as usize];
        read_exact(path, &mut file, &mut header_buf)?;
        let header: ChunkHeader = serde_json::from_slice(&header_buf)
            .map_err(|e| ChunkErr::corrupt(path, format!("unreadable header: {e}")))?;

        if header.paths.len() != header.len {
            return Err(ChunkErr::corrupt(
                path,
                format!(
                    "declares {} examples but lists {} paths",
                    header.len,
                    header.paths.len()
                ),
            ));
        }

        if header.shape.contains(&0) {
            return Err(ChunkErr::corrupt(
                path,
                format!("invalid example shape {:?}", header.shape),
            ));
        }

        let labels_offset = preamble + header_len;
        let images_offset = body_offset(labels_offset, header.len, 4)
            .ok_or_else(|| ChunkErr::corrupt(path, "declared label block overflows"))?;
        let expected = (header.len as u64)
            .checked_mul(header.item_len() as u64)
            .and_then(|n| body_offset(images_offset, n as usize, header.dtype.size()))
            .ok_or_else(|| ChunkErr::corrupt(path, "declared image block overflows"))?;

        if expected != file_len {
            return Err(ChunkErr::corrupt(
                path,
                format!(
                    "declares {} examples of shape {:?} ({} bytes) but the file holds {file_len} bytes",
                    header.len, header.shape, expected
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            labels_offset,
            images_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// The amount of examples stored in this chunk.
    pub fn len(&self) -> usize {
        self.header.len
    }

    pub fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// The per example shape, `[C, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.header.shape
    }

    /// The source identifier of every example in the chunk.
    pub fn paths(&self) -> &[String] {
        &self.header.paths
    }

    /// Reads the labels for the rows in `range`.
    pub fn labels(&mut self, range: Range<usize>) -> Result<Vec<i32>> {
        self.check_range(&range)?;

        let mut raw = vec![0u32; range.len()];
        let offset = self.labels_offset + (range.start * 4) as u64;
        self.read_at(offset, bytemuck::cast_slice_mut(&mut raw))?;

        Ok(raw.into_iter().map(|b| u32::from_le(b) as i32).collect())
    }

    /// Reads the images for the rows in `range` as a `[rows, C, H, W]` tensor.
    pub fn images(&mut self, range: Range<usize>) -> Result<Array4<f32>> {
        self.check_range(&range)?;

        let [c, h, w] = self.header.shape;
        let dtype = self.header.dtype;
        let count = range.len() * self.header.item_len();
        let offset = self.images_offset + (range.start * self.header.item_len() * dtype.size()) as u64;

        let data: Vec<f32> = match dtype {
            Dtype::F32 => {
                let mut raw = vec![0u32; count];
                self.read_at(offset, bytemuck::cast_slice_mut(&mut raw))?;
                raw.into_iter()
                    .map(|b| f32::from_bits(u32::from_le(b)))
                    .collect()
            }
            Dtype::F16 => {
                let mut raw = vec![0u16; count];
                self.read_at(offset, bytemuck::cast_slice_mut(&mut raw))?;
                raw.into_iter()
                    .map(|b| f16::from_bits(u16::from_le(b)).to_f32())
                    .collect()
            }
            Dtype::U8 => {
                let mut raw = vec![0u8; count];
                self.read_at(offset, &mut raw)?;
                raw.into_iter().map(f32::from).collect()
            }
        };

        Array4::from_shape_vec((range.len(), c, h, w), data)
            .map_err(|e| ChunkErr::corrupt(&self.path, e.to_string()))
    }

    /// Releases the underlying file.
    pub fn close(self) {}

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.header.len {
            return Err(ChunkErr::InvalidChunk(format!(
                "rows {}..{} are out of bounds for a chunk of {} examples",
                range.start, range.end, self.header.len
            )));
        }

        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| ChunkErr::io(&self.path, e))?;

        read_exact(&self.path, &mut self.file, buf)
    }
}

fn read_exact(path: &Path, file: &mut File, buf: &mut [u8]) -> Result<()> {
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ChunkErr::corrupt(path, "unexpected end of file"),
        _ => ChunkErr::io(path, e),
    })
}

fn body_offset(start: u64, len: usize, elem_size: usize) -> Option<u64> {
    (len as u64)
        .checked_mul(elem_size as u64)
        .and_then(|n| start.checked_add(n))
}
