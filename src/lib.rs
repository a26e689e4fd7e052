//! Rust Batch Normalization Library
//!
//! This library provides a batch normalization layer for 4-dimensional activations
//! (batch × channel × width × height) together with the small surface a graph engine
//! needs to drive it: a layer trait, per-layer training buffers and an optimizer hook.
//!
//! # Modules
//!
//! - `layers`: Layer trait, training context and the `BatchNorm4dLayer`
//! - `optimizers`: Optimizer trait and SGD
//! - `utils`: Shared utilities (deterministic RNG)
//! - `config`: Layer and training configuration loaded from JSON
//! - `error`: Error type for the configuration boundary

pub mod config;
pub mod error;
pub mod layers;
pub mod optimizers;
pub mod utils;

pub use error::{BatchNormError, Result};
