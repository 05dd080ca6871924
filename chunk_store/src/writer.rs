use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use half::f16;
use log::debug;

use crate::{Chunk, ChunkErr, ChunkHeader, Dtype, LenType, MAGIC, Result};

/// Writes `chunk` into a new chunk file at `path`, replacing any existing file.
///
/// # Arguments
/// * `path` - Where to create the chunk file.
/// * `chunk` - The examples to store.
/// * `dtype` - The on-disk element type for the images.
///
/// # Returns
/// An io error wrapped in `ChunkErr::Io` if the file could not be written, or
/// `ChunkErr::InvalidChunk` if `dtype` is `U8` and an image value isn't an integer
/// in `0..=255`, as happens with normalized pixels.
pub fn write_chunk(path: &Path, chunk: &Chunk, dtype: Dtype) -> Result<()> {
    if dtype == Dtype::U8 {
        let lossy = chunk
            .images()
            .iter()
            .find(|&&v| !(0. ..=255.).contains(&v) || v.fract() != 0.);

        if let Some(v) = lossy {
            return Err(ChunkErr::InvalidChunk(format!(
                "image value {v} can't be stored as u8, write unnormalized pixels or use another dtype"
            )));
        }
    }

    let header = ChunkHeader {
        len: chunk.len(),
        shape: chunk.shape(),
        dtype,
        paths: chunk.paths().to_vec(),
    };

    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| ChunkErr::InvalidChunk(e.to_string()))?;

    let file = File::create(path).map_err(|e| ChunkErr::io(path, e))?;
    let mut writer = BufWriter::new(file);

    let mut write = |bytes: &[u8]| writer.write_all(bytes).map_err(|e| ChunkErr::io(path, e));

    write(MAGIC)?;
    write(&(header_bytes.len() as LenType).to_le_bytes())?;
    write(&header_bytes)?;

    for label in chunk.labels() {
        write(&label.to_le_bytes())?;
    }

    for &v in chunk.images().iter() {
        match dtype {
            Dtype::F32 => write(&v.to_le_bytes())?,
            Dtype::F16 => write(&f16::from_f32(v).to_le_bytes())?,
            Dtype::U8 => write(&[v as u8])?,
        }
    }

    writer.flush().map_err(|e| ChunkErr::io(path, e))?;
    debug!(len = chunk.len(); "wrote chunk {}", path.display());

    Ok(())
}
