use crate::{Gradients, Params, Result};

pub trait Optimizer {
    /// Applies one update step to `params`.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grads` - One gradient per parameter, keyed by name.
    /// * `learning_rate` - The base step length, scaled per parameter by its multiplier.
    ///
    /// # Returns
    /// An error if `grads` doesn't match `params`, in which case no parameter is modified.
    fn update_params(&mut self, params: &mut Params, grads: &Gradients, learning_rate: f32)
    -> Result<()>;
}
