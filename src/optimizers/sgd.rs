//! Stochastic Gradient Descent (SGD) optimizer implementation
//!
//! This module provides a vanilla SGD optimizer that performs the basic
//! gradient descent update: `parameter = parameter - learning_rate * gradient`

use ndarray::{ArrayView1, ArrayViewMut1, Zip};

use crate::optimizers::Optimizer;

/// Stochastic Gradient Descent optimizer.
///
/// `w = w - η * ∇L/∂w`
///
/// Batch normalization gradients are sums over the batch and spatial axes, so the
/// learning rate has to account for the number of observations per channel.
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use rust_batch_norm::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.1);
/// let mut params = array![1.0f32, 2.0, 3.0];
/// optimizer.update(params.view_mut(), array![0.1f32, 0.2, 0.3].view());
/// assert!((params[0] - 0.99).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f32,
}

impl SGD {
    /// Creates a new SGD optimizer with the specified learning rate.
    ///
    /// # Arguments
    ///
    /// * `learning_rate` - The step size for parameter updates (must be positive)
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for SGD {
    /// # Panics
    ///
    /// Panics if `parameters` and `gradients` have different lengths.
    fn update(&mut self, mut parameters: ArrayViewMut1<f32>, gradients: ArrayView1<f32>) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        let lr = self.learning_rate;
        Zip::from(&mut parameters)
            .and(&gradients)
            .for_each(|param, &grad| *param -= lr * grad);
    }

    fn reset(&mut self) {
        // Vanilla SGD has no state to reset
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}
