//! Named model parameters, their optimizers and snapshots.

pub mod error;
pub mod optimization;
pub mod params;
pub mod snapshot;

pub use error::{MlErr, Result};
pub use params::{Gradients, Params};
