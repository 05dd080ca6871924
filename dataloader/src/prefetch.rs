use std::{
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
    },
    thread::{self, JoinHandle},
};

use log::{debug, warn};

use crate::{Batch, DataErr, Result};

/// Produces batches on a background thread, up to `capacity` batches ahead of the consumer.
///
/// The worker sends `None` after the last batch. Dropping the iterator early
/// raises the cancel flag, disconnects the channel and joins the worker, so an
/// abandoned pass never leaves a thread behind.
pub(crate) struct PrefetchBatches {
    rx: Option<Receiver<Option<Result<Batch>>>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchBatches {
    /// Spawns the worker draining `producer`.
    ///
    /// # Arguments
    /// * `producer` - The synchronous batch producer of the pass.
    /// * `capacity` - The maximum amount of finished batches waiting for the consumer.
    ///
    /// # Returns
    /// The consumer side, or `DataErr::Io` if the worker thread couldn't be spawned.
    pub(crate) fn spawn<I>(producer: I, capacity: NonZeroUsize) -> Result<Self>
    where
        I: Iterator<Item = Result<Batch>> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(capacity.get());
        let cancel = Arc::new(AtomicBool::new(false));

        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("batch-prefetch".into())
            .spawn(move || {
                for batch in producer {
                    if worker_cancel.load(Ordering::Relaxed) {
                        debug!("prefetch cancelled");
                        return;
                    }

                    let failed = batch.is_err();
                    if tx.send(Some(batch)).is_err() || failed {
                        return;
                    }
                }

                let _ = tx.send(None);
            })?;

        debug!(capacity = capacity.get(); "spawned prefetch worker");

        Ok(Self {
            rx: Some(rx),
            cancel,
            handle: Some(handle),
        })
    }
}

impl Iterator for PrefetchBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let rx = self.rx.as_ref()?;

        match rx.recv() {
            Ok(Some(batch)) => {
                if batch.is_err() {
                    self.rx = None;
                }

                Some(batch)
            }
            Ok(None) => {
                self.rx = None;
                None
            }
            Err(_) => {
                self.rx = None;
                Some(Err(DataErr::Io(io::Error::other(
                    "prefetch worker stopped before the end of the pass",
                ))))
            }
        }
    }
}

impl Drop for PrefetchBatches {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        drop(self.rx.take());

        if let Some(Err(e)) = self.handle.take().map(JoinHandle::join) {
            warn!("failed to join the prefetch worker: {e:?}");
        }
    }
}
