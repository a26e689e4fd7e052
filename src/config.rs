//! Configuration structures for the batch normalization layer and its training loop
//!
//! Both structures are parsed from JSON. Every field is optional; missing fields take
//! the defaults documented on each struct.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{BatchNormError, Result};

/// Default momentum of the running statistics.
pub const DEFAULT_MOMENTUM: f32 = 0.9;

/// Default epsilon added to the variance before the square root.
pub const DEFAULT_EPSILON: f32 = 1e-8;

/// Hyperparameters of a `BatchNorm4dLayer`.
///
/// # Example
///
/// ```json
/// {
///   "momentum": 0.9,
///   "epsilon": 1e-8
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchNormConfig {
    /// Blend rate of the exponential moving average, in (0, 1)
    pub momentum: f32,

    /// Numerical stability term, must be positive
    pub epsilon: f32,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            momentum: DEFAULT_MOMENTUM,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl BatchNormConfig {
    /// Checks that momentum lies in (0, 1) and epsilon is a positive finite number.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_batch_norm::config::BatchNormConfig;
    ///
    /// assert!(BatchNormConfig::default().validate().is_ok());
    ///
    /// let bad = BatchNormConfig { momentum: 1.5, ..Default::default() };
    /// assert!(bad.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !(self.momentum > 0.0 && self.momentum < 1.0) {
            return Err(BatchNormError::InvalidConfig(format!(
                "momentum must be in (0, 1), got {}",
                self.momentum
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(BatchNormError::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Configuration of a training run over synthetic 4-D batches.
///
/// Used by the `bn_regression` binary.
///
/// # Example
///
/// ```json
/// {
///   "batch_norm": { "momentum": 0.9 },
///   "learning_rate": 0.02,
///   "batch_size": 8,
///   "channels": 3,
///   "width": 4,
///   "height": 4,
///   "steps": 200
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Layer hyperparameters
    pub batch_norm: BatchNormConfig,

    /// SGD step size
    pub learning_rate: f32,

    /// Samples per mini-batch
    pub batch_size: usize,

    /// Channel count K
    pub channels: usize,

    /// Spatial width W
    pub width: usize,

    /// Spatial height H
    pub height: usize,

    /// Number of training steps
    pub steps: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_norm: BatchNormConfig::default(),
            learning_rate: 0.002,
            batch_size: 8,
            channels: 3,
            width: 4,
            height: 4,
            steps: 200,
        }
    }
}

impl TrainingConfig {
    /// Checks the layer hyperparameters and the shape of the training run.
    ///
    /// Rejects zero dimensions, runs where `batch_size * width * height <= 1` (the unbiased
    /// running variance divides by S - 1) and learning rates that are not positive.
    ///
    /// # Errors
    ///
    /// Returns `BatchNormError::InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.batch_norm.validate()?;

        if self.batch_size == 0 || self.channels == 0 || self.width == 0 || self.height == 0 {
            return Err(BatchNormError::InvalidConfig(
                "batch_size, channels, width and height must be positive".to_string(),
            ));
        }

        if self.batch_size * self.width * self.height <= 1 {
            return Err(BatchNormError::InvalidConfig(format!(
                "batch_size * width * height must exceed 1, got {}",
                self.batch_size * self.width * self.height
            )));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(BatchNormError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        Ok(())
    }
}

/// Loads a training configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a `TrainingConfig` and validates it.
///
/// # Returns
///
/// `Ok(TrainingConfig)` on success, or an error if the file cannot be read, the JSON is
/// invalid or a value is out of range.
///
/// # Examples
///
/// ```no_run
/// use rust_batch_norm::config::load_config;
///
/// let cfg = load_config("config/bn_regression.json").unwrap();
/// assert_eq!(cfg.batch_norm.momentum, 0.9);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
