use std::{env, fs, num::NonZeroUsize, path::PathBuf, process, str::FromStr};

use anyhow::Context;
use chunk_store::{ChunkIndex, Dtype};
use dataloader::{
    BatchLoader, ChunkLoader, ChunkLoaderConfig, ExportOptions, ItemLoader, ItemLoaderConfig,
    OutputFormat, export_split,
};
use log::info;
use serde::Deserialize;

const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Where the examples of an export job come from.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
enum JobSource {
    Items(ItemLoaderConfig),
    Chunks(ChunkLoaderConfig),
}

/// A dataset split conversion, read from a JSON file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExportJob {
    source: JobSource,
    format: String,
    out_dir: PathBuf,
    split: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: NonZeroUsize,
    #[serde(default)]
    dtype: Dtype,
}

fn default_chunk_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN)
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} export <job.json>");
    eprintln!("       {program} verify <index.txt> [chunk_dir]");
    process::exit(1);
}

fn export(job_path: &str) -> anyhow::Result<()> {
    let json = fs::read_to_string(job_path).with_context(|| format!("reading {job_path}"))?;
    let job: ExportJob =
        serde_json::from_str(&json).with_context(|| format!("parsing {job_path}"))?;

    let loader: Box<dyn BatchLoader> = match job.source {
        JobSource::Items(config) => Box::new(ItemLoader::new(config)?),
        JobSource::Chunks(config) => Box::new(ChunkLoader::new(config)?),
    };

    let options = ExportOptions {
        format: OutputFormat::from_str(&job.format)?,
        out_dir: job.out_dir,
        split: job.split,
        chunk_size: job.chunk_size,
        dtype: job.dtype,
    };

    let summary = export_split(loader.as_ref(), &options)?;
    info!(examples = summary.examples; "wrote {}", summary.index_path.display());

    Ok(())
}

fn verify(index_path: &str, dir: Option<&str>) -> anyhow::Result<()> {
    let index_path = PathBuf::from(index_path);
    let index = ChunkIndex::load(&index_path)?;

    let dir = match dir {
        Some(dir) => PathBuf::from(dir),
        None => index_path.parent().map(PathBuf::from).unwrap_or_default(),
    };

    let lens = index.verify(&dir)?;

    info!(
        chunks = lens.len(), examples = index.dataset_size, classes = index.num_classes;
        "{} is consistent", index_path.display()
    );

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("batchflow");

    match args.get(1).map(String::as_str) {
        Some("export") if args.len() == 3 => export(&args[2]),
        Some("verify") if (3..=4).contains(&args.len()) => {
            verify(&args[2], args.get(3).map(String::as_str))
        }
        _ => usage(program),
    }
}
