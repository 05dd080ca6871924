use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process,
};

use chunk_store::{ChunkPacker, Dtype};
use dataloader::{
    BatchLoader, ChunkLoader, ChunkLoaderConfig, DataErr, ExportOptions, ImageTransform,
    ImageTransformConfig, ItemLoader, ItemLoaderConfig, Manifest, OutputFormat, PassOptions,
    Prefetch, SourceIndex, export_split, write_item,
};
use ndarray::Array3;

fn temp_dir(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = env::temp_dir().join(format!("dataloader-chunks-{}-{name}", process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Packs `n` single pixel examples whose value equals their index.
fn pack(dir: &Path, n: usize, chunk_size: usize) -> PathBuf {
    let mut packer = ChunkPacker::new(
        dir,
        "train",
        NonZeroUsize::new(chunk_size).unwrap(),
        4,
        Dtype::F32,
    );

    for i in 0..n {
        let image = Array3::from_elem((1, 1, 1), i as f32);
        packer.push(format!("{i}.png"), image.view(), (i % 4) as i32).unwrap();
    }

    let index_path = packer.index_path();
    packer.finish().unwrap();
    index_path
}

fn loader(index: PathBuf, batch_size: usize) -> dataloader::Result<ChunkLoader> {
    ChunkLoader::new(ChunkLoaderConfig {
        index,
        input_dir: None,
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
    })
}

fn values(loader: &ChunkLoader, options: &PassOptions) -> Vec<Vec<usize>> {
    loader
        .batches(options)
        .unwrap()
        .map(|batch| batch.unwrap().x.iter().map(|&v| v as usize).collect())
        .collect()
}

#[test]
fn thousand_examples_in_chunks_of_five_hundred() {
    let dir = temp_dir("thousand");
    let index = pack(&dir, 1000, 500);

    let loader = loader(index.clone(), 250).unwrap();
    assert_eq!(loader.len(), 1000);
    assert_eq!(loader.num_classes(), 4);
    assert_eq!(loader.batches(&PassOptions::default()).unwrap().count(), 4);

    let err = self::loader(index, 300).unwrap_err();
    assert!(matches!(err, DataErr::Config(_)));

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn batches_slice_chunks_in_order() {
    let dir = temp_dir("order");
    let loader = loader(pack(&dir, 10, 4), 2).unwrap();

    let batches: Vec<_> = values(&loader, &PassOptions::default());
    assert_eq!(
        batches,
        [
            vec![0, 1],
            vec![2, 3],
            vec![4, 5],
            vec![6, 7],
            vec![8, 9]
        ]
    );

    let first = loader
        .batches(&PassOptions::default())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(first.y.to_vec(), [0, 1]);
    assert_eq!(first.paths, ["0.png", "1.png"]);

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn shuffling_permutes_whole_chunks() {
    let dir = temp_dir("shuffle");
    let loader = loader(pack(&dir, 50, 10), 5).unwrap();

    let options = PassOptions {
        shuffle: true,
        seed: 3,
        prefetch: Prefetch::Off,
    };

    let batches = values(&loader, &options);
    assert_eq!(batches, values(&loader, &options));

    // rows keep their order inside a chunk
    for pair in batches.chunks(2) {
        let rows = pair.concat();
        assert_eq!(rows[0] % 10, 0);
        assert!(rows.windows(2).all(|w| w[1] == w[0] + 1));
    }

    let mut seen = batches.concat();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn batches_follow_the_declared_iteration_order() {
    let dir = temp_dir("declared-order");

    for (n, chunk_size, batch_size) in [(16, 4, 2), (10, 4, 4)] {
        let loader = loader(pack(&dir, n, chunk_size), batch_size).unwrap();

        for seed in [0, 7, 42] {
            let options = PassOptions {
                shuffle: true,
                seed,
                prefetch: Prefetch::Off,
            };

            let delivered = values(&loader, &options).concat();
            assert_eq!(delivered, loader.source().iteration_order(true, seed), "seed {seed}");
        }
    }

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn prefetch_requests_are_ignored() {
    let dir = temp_dir("prefetch");
    let loader = loader(pack(&dir, 12, 4), 4).unwrap();

    let ahead = PassOptions {
        prefetch: Prefetch::ahead(),
        ..Default::default()
    };

    assert_eq!(values(&loader, &ahead), values(&loader, &PassOptions::default()));

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn a_truncated_chunk_is_corrupt() {
    let dir = temp_dir("truncated");
    let index = pack(&dir, 8, 4);

    let chunk = dir.join("train_2.chunk");
    let bytes = fs::read(&chunk).unwrap();
    fs::write(&chunk, &bytes[..bytes.len() - 4]).unwrap();

    let err = loader(index, 2).unwrap_err();
    assert!(matches!(err, DataErr::Corrupt { .. }));

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn a_missing_chunk_is_a_read_error() {
    let dir = temp_dir("missing");
    let index = pack(&dir, 8, 4);
    fs::remove_file(dir.join("train_1.chunk")).unwrap();

    let err = loader(index, 2).unwrap_err();
    assert!(matches!(err, DataErr::Read { .. }));

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn exported_items_pack_into_equivalent_chunks() {
    let dir = temp_dir("export");
    let items_dir = dir.join("items");
    fs::create_dir_all(&items_dir).unwrap();

    let mut manifest = String::new();
    for i in 0..6 {
        let name = format!("{i}.safetensors");
        write_item(&items_dir.join(&name), Array3::from_elem((1, 2, 2), i as f32).view()).unwrap();
        manifest.push_str(&format!("{name},{}\n", i % 2));
    }

    let mut transform = ImageTransformConfig::new(2, 2);
    transform.greyscale = true;

    let items = ItemLoader::from_parts(
        Manifest::parse(&manifest).unwrap(),
        &items_dir,
        ImageTransform::new(transform.clone()).unwrap(),
        NonZeroUsize::new(2).unwrap(),
    );

    let options = |format| ExportOptions {
        format,
        out_dir: dir.join("out"),
        split: "train".into(),
        chunk_size: NonZeroUsize::new(4).unwrap(),
        dtype: Dtype::F16,
    };

    let chunks = export_split(&items, &options(OutputFormat::Chunks)).unwrap();
    assert_eq!(chunks.examples, 6);

    let chunked = loader(chunks.index_path, 2).unwrap();
    let exported = export_split(&items, &options(OutputFormat::Items)).unwrap();
    let reloaded = ItemLoader::new(ItemLoaderConfig {
        manifest: exported.index_path,
        input_dir: dir.join("out"),
        batch_size: NonZeroUsize::new(2).unwrap(),
        transform,
    })
    .unwrap();

    let original: Vec<_> = items
        .batches(&PassOptions::default())
        .unwrap()
        .map(Result::unwrap)
        .collect();

    for other in [&chunked as &dyn BatchLoader, &reloaded] {
        let batches: Vec<_> = other
            .batches(&PassOptions::default())
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(batches.len(), original.len());
        for (a, b) in batches.iter().zip(&original) {
            assert_eq!(a.x, b.x);
            assert_eq!(a.y, b.y);
        }
    }

    fs::remove_dir_all(dir).unwrap();
}
