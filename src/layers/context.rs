//! Per-layer training buffers
//!
//! The graph engine owns one `TrainingContext` per attached layer. It is allocated once,
//! sized to the configured batch, and overwritten by every mini-batch.

use ndarray::{Array1, Array4};

/// Buffers exchanged between the graph engine, a layer and the optimizer.
///
/// * `input` - Batch fed to the layer (batch_size × K × W × H)
/// * `output` - Batch produced by the layer
/// * `errors` - Gradient of the loss w.r.t. `output`, written by the engine
/// * `w_grad` - Gradient w.r.t. the layer's scale parameters (K)
/// * `b_grad` - Gradient w.r.t. the layer's shift parameters (K)
#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub input: Array4<f32>,
    pub output: Array4<f32>,
    pub errors: Array4<f32>,
    pub w_grad: Array1<f32>,
    pub b_grad: Array1<f32>,
}

impl TrainingContext {
    /// Allocates zero-filled buffers for `batch_size` samples of shape K × W × H.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Samples per mini-batch
    /// * `channels` - Channel count K, also the length of `w_grad` and `b_grad`
    /// * `width`, `height` - Spatial dims W × H
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_batch_norm::layers::TrainingContext;
    ///
    /// let context = TrainingContext::new(4, 3, 2, 2);
    /// assert_eq!(context.input.dim(), (4, 3, 2, 2));
    /// assert_eq!(context.w_grad.len(), 3);
    /// ```
    pub fn new(batch_size: usize, channels: usize, width: usize, height: usize) -> Self {
        let dim = (batch_size, channels, width, height);
        Self {
            input: Array4::zeros(dim),
            output: Array4::zeros(dim),
            errors: Array4::zeros(dim),
            w_grad: Array1::zeros(channels),
            b_grad: Array1::zeros(channels),
        }
    }

    /// Number of samples the buffers hold.
    pub fn batch_size(&self) -> usize {
        self.input.dim().0
    }
}
