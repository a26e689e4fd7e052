//! Shared utilities
//!
//! Deterministic random number generation for tests and demos.

pub mod rng;

pub use rng::SimpleRng;
