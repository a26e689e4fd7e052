//! Batch normalization layer for 4-D activations
//!
//! This module provides a `BatchNorm4dLayer` that normalizes every channel of a
//! batch × channel × width × height tensor over the batch and both spatial axes.
//!
//! # Batch Normalization Theory
//!
//! For each channel k, with S = batch_size × width × height observations:
//!
//! 1. Compute batch statistics: mean μ_k and biased variance σ²_k over the S values
//! 2. Normalize: x̂ = (x - μ_k) / sqrt(σ²_k + ε)
//! 3. Scale and shift: y = γ_k * x̂ + β_k
//!
//! Training passes also fold the batch statistics into running statistics with an
//! exponential moving average. The running variance receives the unbiased estimate
//! S / (S - 1) × σ²_k. Inference passes normalize with the running statistics only.
//!
//! # Forward cache
//!
//! Everything the backward pass needs from the forward pass (batch statistics, inverse
//! standard deviation, whitened activations) lives in a `ForwardCache` returned or
//! refreshed by the training forward pass. Backward and gradient extraction take that
//! cache explicitly; inference never produces one.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use log::{debug, trace, warn};
use ndarray::{Array1, Array4, ArrayView4, ArrayViewMut1, ArrayViewMut4, Axis, Zip};

use crate::config::{BatchNormConfig, DEFAULT_EPSILON, DEFAULT_MOMENTUM};
use crate::error::Result;
use crate::layers::{Layer, TrainingContext};
use crate::optimizers::Optimizer;

/// Intermediate values of the last training forward pass.
///
/// * `last_mean` - Batch mean per channel
/// * `last_var` - Biased batch variance per channel
/// * `inv_var` - 1 / sqrt(last_var + ε) per channel
/// * `input_pre` - Whitened activations (batch_size × K × W × H)
///
/// The `input_pre` buffer is reused across batches of the same shape and reallocated
/// when the batch size changes. Handing the cache to a layer with a different channel
/// count reallocates every buffer.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    last_mean: Array1<f32>,
    last_var: Array1<f32>,
    inv_var: Array1<f32>,
    input_pre: Array4<f32>,
}

impl ForwardCache {
    /// Creates an empty cache (batch size 0) for the given layer.
    pub fn for_layer(layer: &BatchNorm4dLayer) -> Self {
        Self {
            last_mean: Array1::zeros(layer.channels),
            last_var: Array1::zeros(layer.channels),
            inv_var: Array1::zeros(layer.channels),
            input_pre: Array4::zeros((0, layer.channels, layer.width, layer.height)),
        }
    }

    // Sizes every buffer for a batch of shape `dim`; per-channel vectors follow dim.1.
    fn prepare(&mut self, dim: (usize, usize, usize, usize)) {
        let channels = dim.1;
        if self.last_mean.len() != channels {
            self.last_mean = Array1::zeros(channels);
            self.last_var = Array1::zeros(channels);
            self.inv_var = Array1::zeros(channels);
        }
        if self.input_pre.dim() != dim {
            self.input_pre = Array4::zeros(dim);
        }
    }

    /// Batch mean per channel.
    pub fn last_mean(&self) -> &Array1<f32> {
        &self.last_mean
    }

    /// Biased batch variance per channel.
    pub fn last_var(&self) -> &Array1<f32> {
        &self.last_var
    }

    /// 1 / sqrt(last_var + ε) per channel.
    pub fn inv_var(&self) -> &Array1<f32> {
        &self.inv_var
    }

    /// Whitened activations of the last training forward pass.
    pub fn input_pre(&self) -> &Array4<f32> {
        &self.input_pre
    }

    /// Number of channels the cache is currently sized for.
    pub fn channels(&self) -> usize {
        self.last_mean.len()
    }

    /// Batch size of the forward pass that filled this cache.
    pub fn batch_size(&self) -> usize {
        self.input_pre.dim().0
    }

    /// Number of values contributing to each channel's statistics (S = B × W × H).
    pub fn observations(&self) -> usize {
        let (batch, _, width, height) = self.input_pre.dim();
        batch * width * height
    }
}

/// Batch normalization layer for batch × channel × width × height activations.
///
/// # Fields
///
/// * `channels`, `width`, `height` - Per-sample shape K × W × H
/// * `momentum` - Blend rate of the running statistics (default 0.9)
/// * `epsilon` - Numerical stability term (default 1e-8)
/// * `gamma` - Learnable scale per channel (initialized to 1.0)
/// * `beta` - Learnable shift per channel (initialized to 0.0)
/// * `running_mean`, `running_var` - Statistics used at inference (initialized to 0.0)
/// * `backup` - Snapshot of gamma and beta taken by `backup_weights`
///
/// # Example
///
/// ```
/// use ndarray::Array4;
/// use rust_batch_norm::layers::BatchNorm4dLayer;
///
/// let mut layer = BatchNorm4dLayer::new(1, 1, 1);
/// let input = Array4::from_shape_vec((2, 1, 1, 1), vec![2.0, 4.0]).unwrap();
///
/// let (output, cache) = layer.train_forward(input.view());
/// assert_eq!(cache.last_mean()[0], 3.0);
/// assert!((output[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
/// assert!((output[[1, 0, 0, 0]] - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct BatchNorm4dLayer {
    channels: usize,
    width: usize,
    height: usize,
    momentum: f32,
    epsilon: f32,

    // Learnable parameters
    gamma: Array1<f32>,
    beta: Array1<f32>,

    // Running statistics (updated during training, used during inference)
    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    backup: Option<(Array1<f32>, Array1<f32>)>,
}

impl BatchNorm4dLayer {
    /// Creates a layer for samples of shape `channels` × `width` × `height`.
    ///
    /// Gamma starts at 1.0, beta and the running statistics at 0.0. Momentum and epsilon
    /// take their defaults (0.9 and 1e-8).
    ///
    /// # Arguments
    ///
    /// * `channels` - Number of channels K (one gamma/beta pair each)
    /// * `width` - Spatial width W
    /// * `height` - Spatial height H
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_batch_norm::layers::BatchNorm4dLayer;
    ///
    /// let layer = BatchNorm4dLayer::new(16, 8, 8);
    /// assert_eq!(layer.input_size(), 16 * 8 * 8);
    /// assert_eq!(layer.parameters(), 64);
    /// ```
    pub fn new(channels: usize, width: usize, height: usize) -> Self {
        Self::with_hyperparameters(channels, width, height, DEFAULT_MOMENTUM, DEFAULT_EPSILON)
    }

    /// Creates a layer using the momentum and epsilon of `config`.
    ///
    /// # Arguments
    ///
    /// * `channels`, `width`, `height` - Per-sample shape K × W × H
    /// * `config` - Momentum and epsilon; validated before use
    ///
    /// # Errors
    ///
    /// Returns `BatchNormError::InvalidConfig` if the config does not validate.
    pub fn from_config(
        channels: usize,
        width: usize,
        height: usize,
        config: &BatchNormConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_hyperparameters(
            channels,
            width,
            height,
            config.momentum,
            config.epsilon,
        ))
    }

    fn with_hyperparameters(
        channels: usize,
        width: usize,
        height: usize,
        momentum: f32,
        epsilon: f32,
    ) -> Self {
        Self {
            channels,
            width,
            height,
            momentum,
            epsilon,
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::zeros(channels),
            backup: None,
        }
    }

    /// Short name of the layer kind, `"batch_norm"`.
    pub fn short_name(&self) -> &'static str {
        "batch_norm"
    }

    /// Reported parameter count: 4 × channels.
    ///
    /// Counts gamma, beta and both running statistics, although only gamma and beta
    /// receive gradients.
    pub fn parameters(&self) -> usize {
        4 * self.channels
    }

    /// Number of values per sample: K × W × H.
    pub fn input_size(&self) -> usize {
        self.channels * self.width * self.height
    }

    /// Same as `input_size`: batch normalization preserves the shape.
    pub fn output_size(&self) -> usize {
        self.input_size()
    }

    /// Channel count K.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Spatial width W.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Spatial height H.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Blend rate of the running statistics.
    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Stability term added to the variance before the square root.
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Learnable scale, one value per channel.
    pub fn gamma(&self) -> &Array1<f32> {
        &self.gamma
    }

    /// Learnable shift, one value per channel.
    pub fn beta(&self) -> &Array1<f32> {
        &self.beta
    }

    /// Mutable access to gamma, for optimizers and weight loading.
    pub fn gamma_mut(&mut self) -> &mut Array1<f32> {
        &mut self.gamma
    }

    /// Mutable access to beta, for optimizers and weight loading.
    pub fn beta_mut(&mut self) -> &mut Array1<f32> {
        &mut self.beta
    }

    /// Running mean used by inference.
    pub fn running_mean(&self) -> &Array1<f32> {
        &self.running_mean
    }

    /// Running (unbiased) variance used by inference.
    pub fn running_var(&self) -> &Array1<f32> {
        &self.running_var
    }

    fn assert_sample_shape(&self, dim: (usize, usize, usize, usize), what: &str) {
        let (_, channels, width, height) = dim;
        assert_eq!(
            (channels, width, height),
            (self.channels, self.width, self.height),
            "{} shape mismatch: expected [_, {}, {}, {}], got {:?}",
            what,
            self.channels,
            self.width,
            self.height,
            dim
        );
    }

    /// Normalizes `input` with the running statistics.
    ///
    /// Deterministic and side-effect free: the batch composition never influences the
    /// result for a given sample.
    pub fn inference_forward(&self, input: ArrayView4<f32>) -> Array4<f32> {
        let mut output = Array4::zeros(input.dim());
        self.inference_forward_into(input, output.view_mut());
        output
    }

    /// Inference forward pass writing into a caller-provided buffer.
    ///
    /// # Panics
    ///
    /// Panics if the per-sample shape of `input` differs from the layer's or if `output`
    /// does not have the shape of `input`.
    pub fn inference_forward_into(&self, input: ArrayView4<f32>, mut output: ArrayViewMut4<f32>) {
        self.assert_sample_shape(input.dim(), "input");
        assert_eq!(
            output.dim(),
            input.dim(),
            "output shape mismatch: expected {:?}, got {:?}",
            input.dim(),
            output.dim()
        );

        for k in 0..self.channels {
            let gamma = self.gamma[k];
            let beta = self.beta[k];
            let mean = self.running_mean[k];
            let inv_var = 1.0 / (self.running_var[k] + self.epsilon).sqrt();

            Zip::from(output.index_axis_mut(Axis(1), k))
                .and(input.index_axis(Axis(1), k))
                .for_each(|out, &x| *out = gamma * (x - mean) * inv_var + beta);
        }
    }

    /// Training forward pass returning the output and a fresh cache.
    pub fn train_forward(&mut self, input: ArrayView4<f32>) -> (Array4<f32>, ForwardCache) {
        let mut output = Array4::zeros(input.dim());
        let mut cache = ForwardCache::for_layer(self);
        self.train_forward_into(input, output.view_mut(), &mut cache);
        (output, cache)
    }

    /// Training forward pass writing into `output` and refreshing `cache`.
    ///
    /// Normalizes with the statistics of this batch, caches what backward needs and folds
    /// the batch statistics into the running statistics.
    ///
    /// # Panics
    ///
    /// Panics on shape mismatches. In debug builds, also panics when a channel has a single
    /// observation (batch_size × width × height == 1), for which the unbiased running
    /// variance is undefined.
    pub fn train_forward_into(
        &mut self,
        input: ArrayView4<f32>,
        mut output: ArrayViewMut4<f32>,
        cache: &mut ForwardCache,
    ) {
        self.assert_sample_shape(input.dim(), "input");
        assert_eq!(
            output.dim(),
            input.dim(),
            "output shape mismatch: expected {:?}, got {:?}",
            input.dim(),
            output.dim()
        );

        let (batch_size, _, width, height) = input.dim();
        let observations = batch_size * width * height;
        debug_assert!(
            observations > 1,
            "batch normalization needs more than one observation per channel, got {}",
            observations
        );
        debug!(
            "batch_norm train forward: batch_size={}, observations={}",
            batch_size, observations
        );

        let s = observations as f32;
        cache.prepare(input.dim());

        for k in 0..self.channels {
            let plane = input.index_axis(Axis(1), k);
            let mean = plane.sum() / s;
            let var = plane.fold(0.0f32, |acc, &x| acc + (x - mean) * (x - mean)) / s;
            let inv_var = 1.0 / (var + self.epsilon).sqrt();

            cache.last_mean[k] = mean;
            cache.last_var[k] = var;
            cache.inv_var[k] = inv_var;

            let gamma = self.gamma[k];
            let beta = self.beta[k];
            Zip::from(cache.input_pre.index_axis_mut(Axis(1), k))
                .and(output.index_axis_mut(Axis(1), k))
                .and(&plane)
                .for_each(|pre, out, &x| {
                    *pre = (x - mean) * inv_var;
                    *out = gamma * *pre + beta;
                });
        }

        // running = momentum * running + (1 - momentum) * batch
        let blend = 1.0 - self.momentum;
        let correction = s / (s - 1.0);
        self.running_mean *= self.momentum;
        self.running_mean.scaled_add(blend, &cache.last_mean);
        self.running_var *= self.momentum;
        self.running_var.scaled_add(blend * correction, &cache.last_var);
    }

    /// Gradient of the loss w.r.t. the input of the cached forward pass.
    pub fn backward(&self, cache: &ForwardCache, errors: ArrayView4<f32>) -> Array4<f32> {
        let mut grad_input = Array4::zeros(errors.dim());
        self.backward_into(cache, errors, grad_input.view_mut());
        grad_input
    }

    /// Backward pass writing into `grad_input`.
    ///
    /// With dx̂ = errors × γ, per channel:
    ///
    /// `grad_input = inv_var / S × (S × dx̂ - Σ dx̂ - x̂ × Σ (dx̂ × x̂))`
    ///
    /// where x̂ and inv_var come from `cache`.
    ///
    /// # Panics
    ///
    /// Panics if `errors` does not match the cached batch or `grad_input` does not match
    /// `errors`.
    pub fn backward_into(
        &self,
        cache: &ForwardCache,
        errors: ArrayView4<f32>,
        mut grad_input: ArrayViewMut4<f32>,
    ) {
        self.assert_sample_shape(errors.dim(), "errors");
        assert_eq!(
            errors.dim(),
            cache.input_pre.dim(),
            "errors shape mismatch: expected {:?}, got {:?}",
            cache.input_pre.dim(),
            errors.dim()
        );
        assert_eq!(
            grad_input.dim(),
            errors.dim(),
            "grad_input shape mismatch: expected {:?}, got {:?}",
            errors.dim(),
            grad_input.dim()
        );

        let s = cache.observations() as f32;
        trace!("batch_norm backward: batch_size={}", cache.batch_size());

        for k in 0..self.channels {
            let gamma = self.gamma[k];
            let errors_k = errors.index_axis(Axis(1), k);
            let pre_k = cache.input_pre.index_axis(Axis(1), k);

            let (dxhat_sum, dxhat_dot_xhat) = Zip::from(&errors_k).and(&pre_k).fold(
                (0.0f32, 0.0f32),
                |(sum, dot), &e, &pre| {
                    let dxhat = e * gamma;
                    (sum + dxhat, dot + dxhat * pre)
                },
            );

            let scale = cache.inv_var[k] / s;
            Zip::from(grad_input.index_axis_mut(Axis(1), k))
                .and(&errors_k)
                .and(&pre_k)
                .for_each(|grad, &e, &pre| {
                    *grad = scale * (s * e * gamma - dxhat_sum - pre * dxhat_dot_xhat);
                });
        }
    }

    /// Gradients w.r.t. gamma and beta, returned as `(w_grad, b_grad)`.
    pub fn parameter_gradients(
        &self,
        cache: &ForwardCache,
        errors: ArrayView4<f32>,
    ) -> (Array1<f32>, Array1<f32>) {
        let mut w_grad = Array1::zeros(self.channels);
        let mut b_grad = Array1::zeros(self.channels);
        self.parameter_gradients_into(cache, errors, w_grad.view_mut(), b_grad.view_mut());
        (w_grad, b_grad)
    }

    /// Writes `w_grad[k] = Σ x̂ × errors` and `b_grad[k] = Σ errors` over batch and space.
    pub fn parameter_gradients_into(
        &self,
        cache: &ForwardCache,
        errors: ArrayView4<f32>,
        mut w_grad: ArrayViewMut1<f32>,
        mut b_grad: ArrayViewMut1<f32>,
    ) {
        self.assert_sample_shape(errors.dim(), "errors");
        assert_eq!(
            errors.dim(),
            cache.input_pre.dim(),
            "errors shape mismatch: expected {:?}, got {:?}",
            cache.input_pre.dim(),
            errors.dim()
        );
        assert_eq!(w_grad.len(), self.channels, "w_grad len mismatch");
        assert_eq!(b_grad.len(), self.channels, "b_grad len mismatch");

        trace!("batch_norm gradients: batch_size={}", cache.batch_size());

        for k in 0..self.channels {
            let errors_k = errors.index_axis(Axis(1), k);
            let pre_k = cache.input_pre.index_axis(Axis(1), k);

            w_grad[k] = Zip::from(&errors_k)
                .and(&pre_k)
                .fold(0.0f32, |acc, &e, &pre| acc + e * pre);
            b_grad[k] = errors_k.sum();
        }
    }

    /// Saves a copy of gamma and beta, replacing any earlier backup.
    pub fn backup_weights(&mut self) {
        debug!("batch_norm: backing up {} channels", self.channels);
        self.backup = Some((self.gamma.clone(), self.beta.clone()));
    }

    /// Restores gamma and beta from the last backup.
    ///
    /// Running statistics are left untouched. Returns `false` and changes nothing when no
    /// backup was taken.
    pub fn restore_weights(&mut self) -> bool {
        match &self.backup {
            Some((gamma, beta)) => {
                self.gamma.assign(gamma);
                self.beta.assign(beta);
                debug!("batch_norm: restored {} channels", self.channels);
                true
            }
            None => {
                warn!("batch_norm: restore_weights called without a backup");
                false
            }
        }
    }
}

impl Layer for BatchNorm4dLayer {
    type Cache = ForwardCache;

    fn short_name(&self) -> &'static str {
        BatchNorm4dLayer::short_name(self)
    }

    fn parameters(&self) -> usize {
        BatchNorm4dLayer::parameters(self)
    }

    fn input_size(&self) -> usize {
        BatchNorm4dLayer::input_size(self)
    }

    fn output_size(&self) -> usize {
        BatchNorm4dLayer::output_size(self)
    }

    fn training_context(&self, batch_size: usize) -> TrainingContext {
        TrainingContext::new(batch_size, self.channels, self.width, self.height)
    }

    fn new_cache(&self) -> ForwardCache {
        ForwardCache::for_layer(self)
    }

    fn activate(&self, input: ArrayView4<f32>, output: ArrayViewMut4<f32>) {
        self.inference_forward_into(input, output);
    }

    fn train_batch(&mut self, context: &mut TrainingContext, cache: &mut ForwardCache) {
        self.train_forward_into(context.input.view(), context.output.view_mut(), cache);
    }

    /// No-op: batch normalization has no fused non-linearity.
    fn adapt_errors(&self, _context: &mut TrainingContext) {}

    fn backward_batch(
        &self,
        context: &TrainingContext,
        cache: &ForwardCache,
        grad_input: ArrayViewMut4<f32>,
    ) {
        self.backward_into(cache, context.errors.view(), grad_input);
    }

    fn compute_gradients(&self, context: &mut TrainingContext, cache: &ForwardCache) {
        self.parameter_gradients_into(
            cache,
            context.errors.view(),
            context.w_grad.view_mut(),
            context.b_grad.view_mut(),
        );
    }

    fn update_with_optimizer(&mut self, context: &TrainingContext, optimizer: &mut dyn Optimizer) {
        optimizer.update(self.gamma.view_mut(), context.w_grad.view());
        optimizer.update(self.beta.view_mut(), context.b_grad.view());
    }
}
