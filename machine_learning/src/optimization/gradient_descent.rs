use ndarray::Zip;

use super::{LrMultipliers, Optimizer};
use crate::{Gradients, Params, Result};

/// Gradient descent optimization algorithm.
#[derive(Debug, Default)]
pub struct GradientDescent {
    multipliers: LrMultipliers,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `multipliers` - The per parameter scale of the learning rate.
    pub fn new(multipliers: LrMultipliers) -> Self {
        Self { multipliers }
    }
}

impl Optimizer for GradientDescent {
    /// Updates the parameters according to the algorithm's learning rule, that is, making a step in
    /// the opposite direction of the gradient, with a length of `learning_rate` times the
    /// parameter's multiplier.
    fn update_params(
        &mut self,
        params: &mut Params,
        grads: &Gradients,
        learning_rate: f32,
    ) -> Result<()> {
        params.check_gradients(grads)?;

        for (name, w) in params.iter_mut() {
            let lr = learning_rate * self.multipliers.get(name);

            Zip::from(w).and(&grads[name]).for_each(|w, g| {
                *w -= lr * g;
            });
        }

        Ok(())
    }
}
