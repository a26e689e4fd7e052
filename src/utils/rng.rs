//! Simple random number generator for reproducible batches.
//!
//! A lightweight xorshift PRNG used by the tests and the demo binary to build
//! deterministic 4-D inputs.

use ndarray::Array4;

/// Xorshift generator with a fixed, explicit seed.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    /// Next 32 bits of the xorshift64 stream (upper half of the state).
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Uniform sample in [0, 1), built from the top 24 bits.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Batch of shape `dim` filled with uniform samples in [low, high).
    pub fn uniform_batch(
        &mut self,
        dim: (usize, usize, usize, usize),
        low: f32,
        high: f32,
    ) -> Array4<f32> {
        Array4::from_shape_simple_fn(dim, || self.gen_range_f32(low, high))
    }
}
