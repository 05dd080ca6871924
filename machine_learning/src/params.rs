use std::collections::HashMap;

use ndarray::ArrayD;

use crate::{MlErr, Result};

/// The gradient of every parameter, keyed by parameter name.
pub type Gradients = HashMap<String, ArrayD<f32>>;

/// An ordered set of named parameter tensors.
///
/// The declaration order is the enumeration order used everywhere a stable
/// ordering is needed, namely snapshots and multiplier files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    names: Vec<String>,
    tensors: Vec<ArrayD<f32>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `Params` from `(name, tensor)` pairs, in declaration order.
    pub fn from_named<S, I>(named: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, ArrayD<f32>)>,
    {
        let mut params = Self::new();

        for (name, tensor) in named {
            params.push(name, tensor)?;
        }

        Ok(params)
    }

    /// Appends a new parameter.
    ///
    /// # Returns
    /// `MlErr::DuplicateParam` if a parameter with the same name already exists.
    pub fn push(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> Result<()> {
        let name = name.into();

        if self.position(&name).is_some() {
            return Err(MlErr::DuplicateParam(name));
        }

        self.names.push(name);
        self.tensors.push(tensor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The index of the parameter called `name` in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.position(name).map(|i| &self.tensors[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.position(name).map(|i| &mut self.tensors[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.names.iter().map(String::as_str).zip(&self.tensors)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ArrayD<f32>)> {
        self.names.iter().map(String::as_str).zip(&mut self.tensors)
    }

    /// The total amount of scalars across every parameter.
    pub fn size(&self) -> usize {
        self.tensors.iter().map(ArrayD::len).sum()
    }

    /// Checks that `grads` holds exactly one gradient per parameter, each of the
    /// same shape as its parameter.
    pub fn check_gradients(&self, grads: &Gradients) -> Result<()> {
        for (name, tensor) in self.iter() {
            let grad = grads
                .get(name)
                .ok_or_else(|| MlErr::MissingGradient(name.to_string()))?;

            if grad.shape() != tensor.shape() {
                return Err(MlErr::ShapeMismatch {
                    name: name.to_string(),
                    got: grad.shape().to_vec(),
                    expected: tensor.shape().to_vec(),
                });
            }
        }

        if grads.len() != self.len() {
            if let Some(unknown) = grads.keys().find(|name| self.position(name).is_none()) {
                return Err(MlErr::UnknownGradient(unknown.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn params() -> Params {
        Params::from_named([
            ("conv1.w", ArrayD::zeros(IxDyn(&[2, 3]))),
            ("conv1.b", ArrayD::zeros(IxDyn(&[3]))),
        ])
        .unwrap()
    }

    #[test]
    fn keeps_declaration_order() {
        let params = params();

        assert_eq!(params.names(), ["conv1.w", "conv1.b"]);
        assert_eq!(params.position("conv1.b"), Some(1));
        assert_eq!(params.size(), 9);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut params = params();
        let err = params.push("conv1.w", ArrayD::zeros(IxDyn(&[1]))).unwrap_err();

        assert!(matches!(err, MlErr::DuplicateParam(name) if name == "conv1.w"));
    }

    #[test]
    fn gradients_must_match_the_parameters() {
        let params = params();
        let mut grads: Gradients = params
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect();
        assert!(params.check_gradients(&grads).is_ok());

        grads.insert("fc.w".into(), ArrayD::zeros(IxDyn(&[1])));
        assert!(matches!(
            params.check_gradients(&grads),
            Err(MlErr::UnknownGradient(_))
        ));

        grads.remove("fc.w");
        grads.insert("conv1.b".into(), ArrayD::zeros(IxDyn(&[4])));
        assert!(matches!(
            params.check_gradients(&grads),
            Err(MlErr::ShapeMismatch { .. })
        ));

        grads.remove("conv1.b");
        assert!(matches!(
            params.check_gradients(&grads),
            Err(MlErr::MissingGradient(name)) if name == "conv1.b"
        ));
    }
}
