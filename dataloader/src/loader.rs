use crate::{
    Batch, PassOptions, Result, chunks::ChunkBatches, items::ItemBatches,
    prefetch::PrefetchBatches,
};

/// A source of fixed-shape batches over one dataset split.
///
/// Every call to `batches` starts a fresh, finite pass over the whole split.
pub trait BatchLoader {
    /// The amount of examples in the split.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of distinct classes in the split.
    fn num_classes(&self) -> usize;

    /// The amount of examples per batch, only the last batch of a pass may hold fewer.
    fn batch_size(&self) -> usize;

    /// The amount of batches of a full pass.
    fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size())
    }

    /// Starts a new pass over the split.
    ///
    /// # Arguments
    /// * `options` - Shuffling and prefetching options of this pass.
    ///
    /// # Returns
    /// A lazy sequence of batches in iteration order.
    fn batches(&self, options: &PassOptions) -> Result<Batches>;
}

enum Backend {
    Items(ItemBatches),
    Chunks(ChunkBatches),
    Prefetch(PrefetchBatches),
}

/// The batches of a single pass.
///
/// Yields every batch in iteration order and stops right after the first error.
pub struct Batches {
    backend: Backend,
    done: bool,
}

impl Batches {
    pub(crate) fn items(items: ItemBatches) -> Self {
        Self::with_backend(Backend::Items(items))
    }

    pub(crate) fn chunks(chunks: ChunkBatches) -> Self {
        Self::with_backend(Backend::Chunks(chunks))
    }

    pub(crate) fn prefetch(prefetch: PrefetchBatches) -> Self {
        Self::with_backend(Backend::Prefetch(prefetch))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            done: false,
        }
    }
}

impl Iterator for Batches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let next = match &mut self.backend {
            Backend::Items(iter) => iter.next(),
            Backend::Chunks(iter) => iter.next(),
            Backend::Prefetch(iter) => iter.next(),
        };

        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }

        next
    }
}
