//! Dataset loading and momentum training.
//!
//! This crate ties the workspace together:
//! - `chunk_store` packs examples into fixed-size chunk files.
//! - `dataloader` turns item manifests or chunk indexes into batches.
//! - `machine_learning` holds parameters, optimizers and snapshots.
//! - `training` drives the training loop.

pub use chunk_store;
pub use dataloader;
pub use machine_learning;
pub use training;
