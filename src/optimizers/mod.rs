//! Optimizer abstractions for neural network parameter updates
//!
//! Layers compute gradients; optimizers decide how those gradients move the parameters.
//! A layer hands each parameter vector and its gradient to `Optimizer::update` (see
//! `Layer::update_with_optimizer`) and never applies gradients itself.
//!
//! # Available Optimizers
//!
//! - SGD: Vanilla stochastic gradient descent
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use rust_batch_norm::optimizers::{Optimizer, SGD};
//!
//! let mut optimizer = SGD::new(0.5);
//! let mut gamma = array![1.0f32, 1.0];
//! let w_grad = array![0.2f32, -0.2];
//!
//! optimizer.update(gamma.view_mut(), w_grad.view());
//! assert!((gamma[0] - 0.9).abs() < 1e-6);
//! assert!((gamma[1] - 1.1).abs() < 1e-6);
//! ```

pub mod sgd;

pub use sgd::SGD;

use ndarray::{ArrayView1, ArrayViewMut1};

/// Core trait for neural network optimizers.
///
/// # State Management
///
/// Stateful optimizers (momentum, adaptive rates) keep their state internally, so callers
/// only provide parameters and gradients.
pub trait Optimizer {
    /// Update parameters in place using gradients.
    ///
    /// # Panics
    ///
    /// Implementations may panic if parameters and gradients have different lengths.
    fn update(&mut self, parameters: ArrayViewMut1<f32>, gradients: ArrayView1<f32>);

    /// Clears any internal state. A no-op for stateless optimizers.
    fn reset(&mut self);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);
}
