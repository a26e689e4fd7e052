//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, the per-layer training context and the
//! batch normalization layer for 4-D activations.

mod r#trait;
pub mod batchnorm;
pub mod context;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use batchnorm::{BatchNorm4dLayer, ForwardCache};
pub use context::TrainingContext;
