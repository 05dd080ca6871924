use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use ndarray::{Array1, Array4, Axis};

use crate::{
    Batch, BatchLoader, Batches, ImageTransform, ItemLoaderConfig, Manifest, PassOptions,
    Prefetch, Result, SourceIndex, prefetch::PrefetchBatches,
};

struct ItemSource {
    manifest: Manifest,
    input_dir: PathBuf,
    transform: ImageTransform,
    batch_size: NonZeroUsize,
}

impl ItemSource {
    /// Reads and stacks the examples at `indices` into a batch.
    fn batch(&self, indices: &[usize]) -> Result<Batch> {
        let [c, h, w] = self.transform.shape();
        let mut x = Array4::zeros((indices.len(), c, h, w));
        let mut y = Vec::with_capacity(indices.len());
        let mut paths = Vec::with_capacity(indices.len());

        for (mut row, &idx) in x.axis_iter_mut(Axis(0)).zip(indices) {
            let entry = &self.manifest.entries()[idx];
            let item = self.transform.load(&self.input_dir.join(&entry.locator))?;

            row.assign(&item);
            y.push(entry.label as i32);
            paths.push(entry.locator.clone());
        }

        Ok(Batch {
            x,
            y: Array1::from(y),
            paths,
        })
    }
}

/// The synchronous producer of an item-mode pass.
pub(crate) struct ItemBatches {
    source: Arc<ItemSource>,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for ItemBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.source.batch_size.get()).min(self.order.len());
        let batch = self.source.batch(&self.order[self.cursor..end]);
        self.cursor = end;

        Some(batch)
    }
}

/// Loads batches from individual item files listed in a manifest.
///
/// Every example is read and transformed on its own, either on the consumer's
/// thread or on a prefetching worker.
#[derive(Clone)]
pub struct ItemLoader {
    source: Arc<ItemSource>,
}

impl ItemLoader {
    /// Creates a new `ItemLoader`, reading the manifest and the mean image eagerly.
    ///
    /// # Returns
    /// `DataErr::Config` if the manifest or the transform configuration is invalid.
    pub fn new(config: ItemLoaderConfig) -> Result<Self> {
        let manifest = Manifest::load(&config.manifest)?;
        let transform = ImageTransform::new(config.transform)?;

        Ok(Self::from_parts(
            manifest,
            config.input_dir,
            transform,
            config.batch_size,
        ))
    }

    /// Creates a new `ItemLoader` from an already built manifest and transform.
    pub fn from_parts(
        manifest: Manifest,
        input_dir: impl Into<PathBuf>,
        transform: ImageTransform,
        batch_size: NonZeroUsize,
    ) -> Self {
        let source = ItemSource {
            manifest,
            input_dir: input_dir.into(),
            transform,
            batch_size,
        };

        Self {
            source: Arc::new(source),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.source.manifest
    }

    pub fn input_dir(&self) -> &Path {
        &self.source.input_dir
    }
}

impl BatchLoader for ItemLoader {
    fn len(&self) -> usize {
        self.source.manifest.size()
    }

    fn num_classes(&self) -> usize {
        self.source.manifest.num_classes()
    }

    fn batch_size(&self) -> usize {
        self.source.batch_size.get()
    }

    fn batches(&self, options: &PassOptions) -> Result<Batches> {
        let order = self
            .source
            .manifest
            .iteration_order(options.shuffle, options.seed);

        debug!(
            examples = order.len(), batch_size = self.batch_size(), shuffle = options.shuffle;
            "starting item pass"
        );

        let producer = ItemBatches {
            source: Arc::clone(&self.source),
            order,
            cursor: 0,
        };

        match options.prefetch {
            Prefetch::Off => Ok(Batches::items(producer)),
            Prefetch::Ahead(capacity) => {
                PrefetchBatches::spawn(producer, capacity).map(Batches::prefetch)
            }
        }
    }
}
