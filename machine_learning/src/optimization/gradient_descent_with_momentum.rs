use std::collections::HashMap;

use ndarray::{ArrayD, Zip};

use super::{LrMultipliers, Optimizer};
use crate::{Gradients, MlErr, Params, Result};

/// Gradient descent with momentum.
///
/// For every parameter `p` with gradient `g`:
/// `v = momentum * v - lr * multiplier(p) * g` and then `p += v`.
///
/// Velocities are zero-initialized the first time a parameter is updated and
/// persist across calls for the lifetime of the optimizer.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    momentum: f32,
    multipliers: LrMultipliers,
    velocity: HashMap<String, ArrayD<f32>>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `momentum` - The decay of the accumulated velocity, `0` reduces it to plain gradient descent.
    /// * `multipliers` - The per parameter scale of the learning rate.
    pub fn new(momentum: f32, multipliers: LrMultipliers) -> Self {
        Self {
            momentum,
            multipliers,
            velocity: HashMap::new(),
        }
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn multipliers(&self) -> &LrMultipliers {
        &self.multipliers
    }

    /// Applies one update step with an explicit `momentum`.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grads` - One gradient per parameter, keyed by name.
    /// * `learning_rate` - The base step length.
    /// * `momentum` - The velocity decay used for this step.
    pub fn update(
        &mut self,
        params: &mut Params,
        grads: &Gradients,
        learning_rate: f32,
        momentum: f32,
    ) -> Result<()> {
        params.check_gradients(grads)?;

        for (name, w) in params.iter_mut() {
            let lr = learning_rate * self.multipliers.get(name);
            let v = self
                .velocity
                .entry(name.to_string())
                .or_insert_with(|| ArrayD::zeros(w.raw_dim()));

            Zip::from(w)
                .and(v)
                .and(&grads[name])
                .for_each(|w, v, g| {
                    *v = momentum * *v - lr * g;
                    *w += *v;
                });
        }

        Ok(())
    }

    /// The velocity of every parameter in declaration order, zeros for parameters
    /// that were never updated.
    pub fn velocity(&self, params: &Params) -> Vec<ArrayD<f32>> {
        params
            .iter()
            .map(|(name, w)| match self.velocity.get(name) {
                Some(v) => v.clone(),
                None => ArrayD::zeros(w.raw_dim()),
            })
            .collect()
    }

    /// Replaces the velocity state, `velocity` being in the declaration order of `params`.
    pub fn set_velocity(&mut self, params: &Params, velocity: Vec<ArrayD<f32>>) -> Result<()> {
        if velocity.len() != params.len() {
            return Err(MlErr::SnapshotMismatch {
                got: velocity.len(),
                expected: params.len(),
            });
        }

        for ((name, w), v) in params.iter().zip(&velocity) {
            if v.shape() != w.shape() {
                return Err(MlErr::ShapeMismatch {
                    name: name.to_string(),
                    got: v.shape().to_vec(),
                    expected: w.shape().to_vec(),
                });
            }
        }

        self.velocity = params
            .names()
            .iter()
            .cloned()
            .zip(velocity)
            .collect();

        Ok(())
    }

    /// Forgets every accumulated velocity.
    pub fn reset(&mut self) {
        self.velocity.clear();
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(
        &mut self,
        params: &mut Params,
        grads: &Gradients,
        learning_rate: f32,
    ) -> Result<()> {
        self.update(params, grads, learning_rate, self.momentum)
    }
}
