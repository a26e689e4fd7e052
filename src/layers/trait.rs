//! Layer trait definition for neural network layers
//!
//! This module defines the contract a graph engine uses to drive a layer through one
//! mini-batch: forward in training mode, error adaption, backward, gradient extraction
//! and the hand-off of gradients to an optimizer.

use ndarray::{ArrayView4, ArrayViewMut4};

use crate::layers::TrainingContext;
use crate::optimizers::Optimizer;

/// Core trait for neural network layers operating on 4-D batches.
///
/// Every call of a training step works on the same `TrainingContext` and on the
/// `Cache` produced by `train_batch`. The cache type carries whatever the backward pass
/// needs from the forward pass, so backward cannot be called without a training forward.
///
/// # Example
///
/// ```ignore
/// let mut context = layer.training_context(batch_size);
/// let mut cache = layer.new_cache();
///
/// // one mini-batch
/// context.input.assign(&batch);
/// layer.train_batch(&mut context, &mut cache);
/// context.errors.assign(&loss_gradient);
/// layer.adapt_errors(&mut context);
/// layer.backward_batch(&context, &cache, previous_errors.view_mut());
/// layer.compute_gradients(&mut context, &cache);
/// layer.update_with_optimizer(&context, &mut optimizer);
/// ```
pub trait Layer {
    /// State produced by a training forward pass and consumed by backward.
    type Cache;

    /// Short human-readable name of the layer kind.
    fn short_name(&self) -> &'static str;

    /// Number of parameters reported for this layer.
    fn parameters(&self) -> usize;

    /// Number of input values per sample.
    fn input_size(&self) -> usize;

    /// Number of output values per sample.
    fn output_size(&self) -> usize;

    /// Allocates the training buffers for `batch_size` samples.
    fn training_context(&self, batch_size: usize) -> TrainingContext;

    /// Allocates an empty forward cache.
    fn new_cache(&self) -> Self::Cache;

    /// Inference forward pass. Never mutates the layer.
    fn activate(&self, input: ArrayView4<f32>, output: ArrayViewMut4<f32>);

    /// Training forward pass from `context.input` into `context.output`.
    ///
    /// Refreshes `cache` and any running state of the layer.
    fn train_batch(&mut self, context: &mut TrainingContext, cache: &mut Self::Cache);

    /// Adjusts `context.errors` before backpropagation.
    ///
    /// Layers that fuse a non-linearity apply its derivative here.
    fn adapt_errors(&self, context: &mut TrainingContext);

    /// Writes the gradient of the loss w.r.t. the layer input into `grad_input`.
    fn backward_batch(
        &self,
        context: &TrainingContext,
        cache: &Self::Cache,
        grad_input: ArrayViewMut4<f32>,
    );

    /// Writes the parameter gradients into `context.w_grad` and `context.b_grad`.
    fn compute_gradients(&self, context: &mut TrainingContext, cache: &Self::Cache);

    /// Hands the gradients in `context` to `optimizer` together with the parameters they
    /// belong to.
    fn update_with_optimizer(&mut self, context: &TrainingContext, optimizer: &mut dyn Optimizer);
}
