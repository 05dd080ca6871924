use std::{
    fmt::{self, Display},
    fs,
    io::{self, BufWriter, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

use chunk_store::{ChunkIndex, ChunkPacker, Dtype};
use log::info;
use ndarray::{ArrayView3, Axis};
use safetensors::tensor::{self, Dtype as TensorDtype, TensorView};

use crate::{BatchLoader, DataErr, ITEM_TENSOR, PassOptions, Result};

/// The on-disk layout a dataset split is exported to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One `.safetensors` file per example plus a `filename,label` manifest.
    Items,
    /// Fixed-size chunk files plus a chunk index.
    Chunks,
}

impl FromStr for OutputFormat {
    type Err = DataErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "items" => Ok(Self::Items),
            "chunks" => Ok(Self::Chunks),
            other => Err(DataErr::Config(format!(
                "unknown output format '{other}', expected 'items' or 'chunks'"
            ))),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Items => write!(f, "items"),
            Self::Chunks => write!(f, "chunks"),
        }
    }
}

/// Where and how a split is exported.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: OutputFormat,
    pub out_dir: PathBuf,
    /// The split name, used as the prefix of every written file.
    pub split: String,
    /// Examples per chunk, only used by `OutputFormat::Chunks`.
    pub chunk_size: NonZeroUsize,
    /// The chunk element type, only used by `OutputFormat::Chunks`.
    pub dtype: Dtype,
}

/// The files written by `export_split`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub examples: usize,
    /// The written manifest or chunk index.
    pub index_path: PathBuf,
}

/// Writes every example of `loader` to `options.out_dir` in the requested format.
///
/// The split is read once, in its unshuffled order. `Items` writes
/// `{split}/{n:06}.safetensors` files plus `{split}.txt`, `Chunks` writes
/// `{split}_{n}.chunk` files plus `{split}_index.txt`.
///
/// # Arguments
/// * `loader` - The split to export.
/// * `options` - The output layout.
///
/// # Returns
/// What was written, or the first loading or writing failure.
pub fn export_split(loader: &dyn BatchLoader, options: &ExportOptions) -> Result<ExportSummary> {
    fs::create_dir_all(&options.out_dir)?;

    let summary = match options.format {
        OutputFormat::Items => export_items(loader, options)?,
        OutputFormat::Chunks => export_chunks(loader, options)?,
    };

    info!(
        examples = summary.examples;
        "exported split '{}' as {} to {}", options.split, options.format, options.out_dir.display()
    );

    Ok(summary)
}

fn export_items(loader: &dyn BatchLoader, options: &ExportOptions) -> Result<ExportSummary> {
    let items_dir = options.out_dir.join(&options.split);
    fs::create_dir_all(&items_dir)?;

    let index_path = options.out_dir.join(format!("{}.txt", options.split));
    let mut manifest = BufWriter::new(fs::File::create(&index_path)?);

    let mut examples = 0;
    for batch in loader.batches(&PassOptions::default())? {
        let batch = batch?;

        for (item, &label) in batch.x.axis_iter(Axis(0)).zip(&batch.y) {
            let locator = format!("{}/{examples:06}.safetensors", options.split);
            write_item(&options.out_dir.join(&locator), item)?;

            writeln!(manifest, "{locator},{label}")?;
            examples += 1;
        }
    }

    manifest.flush()?;

    Ok(ExportSummary {
        examples,
        index_path,
    })
}

fn export_chunks(loader: &dyn BatchLoader, options: &ExportOptions) -> Result<ExportSummary> {
    let mut packer = ChunkPacker::new(
        &options.out_dir,
        &options.split,
        options.chunk_size,
        loader.num_classes(),
        options.dtype,
    );
    let index_path = packer.index_path();

    for batch in loader.batches(&PassOptions::default())? {
        let batch = batch?;

        for ((item, &label), path) in batch.x.axis_iter(Axis(0)).zip(&batch.y).zip(&batch.paths) {
            packer.push(path.as_str(), item, label)?;
        }
    }

    let ChunkIndex { dataset_size, .. } = packer.finish()?;

    Ok(ExportSummary {
        examples: dataset_size,
        index_path,
    })
}

/// Writes a single `[C, H, W]` item as a `.safetensors` file holding an `im` tensor.
pub fn write_item(path: &Path, item: ArrayView3<f32>) -> Result<()> {
    let (c, h, w) = item.dim();
    let bytes: Vec<u8> = item.iter().flat_map(|v| v.to_le_bytes()).collect();

    let view = TensorView::new(TensorDtype::F32, vec![c, h, w], &bytes)
        .map_err(|e| DataErr::corrupt(path, e))?;

    tensor::serialize_to_file([(ITEM_TENSOR, &view)], &None, path)
        .map_err(|e| DataErr::Io(io::Error::other(format!("{}: {e}", path.display()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_names() {
        assert_eq!("items".parse::<OutputFormat>().unwrap(), OutputFormat::Items);
        assert_eq!("chunks".parse::<OutputFormat>().unwrap(), OutputFormat::Chunks);
        assert_eq!(OutputFormat::Chunks.to_string(), "chunks");
    }

    #[test]
    fn unknown_output_format_is_a_config_error() {
        let err = "h5py".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, DataErr::Config(_)));
    }
}
