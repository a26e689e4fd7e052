// Integration tests for the 4-D batch normalization layer.
// Covers training/inference forward passes, running statistics and the forward cache.

use approx::assert_relative_eq;
use ndarray::{Array4, Axis};
use rust_batch_norm::config::BatchNormConfig;
use rust_batch_norm::layers::{BatchNorm4dLayer, ForwardCache};
use rust_batch_norm::utils::SimpleRng;

// Random batch where channel k is centered on 2k with spread k + 1.
fn channel_shifted_batch(seed: u64, dim: (usize, usize, usize, usize)) -> Array4<f32> {
    let mut batch = SimpleRng::new(seed).uniform_batch(dim, -1.0, 1.0);
    for (k, mut plane) in batch.axis_iter_mut(Axis(1)).enumerate() {
        plane.mapv_inplace(|u| 2.0 * k as f32 + (k as f32 + 1.0) * u);
    }
    batch
}

fn channel_mean_var(batch: &Array4<f32>, k: usize) -> (f32, f32) {
    let plane = batch.index_axis(Axis(1), k);
    let n = plane.len() as f32;
    let mean = plane.sum() / n;
    let var = plane.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
    (mean, var)
}

// ============================================================================
// Initialization Tests
// ============================================================================

#[test]
fn test_batchnorm_initialization() {
    let layer = BatchNorm4dLayer::new(8, 5, 3);

    assert_eq!(layer.channels(), 8);
    assert_eq!(layer.width(), 5);
    assert_eq!(layer.height(), 3);
    assert_eq!(layer.input_size(), 8 * 5 * 3);
    assert_eq!(layer.output_size(), layer.input_size());
    assert_eq!(layer.momentum(), 0.9);
    assert_eq!(layer.epsilon(), 1e-8);

    assert_eq!(layer.gamma().len(), 8);
    assert_eq!(layer.beta().len(), 8);
    assert_eq!(layer.running_mean().len(), 8);
    assert_eq!(layer.running_var().len(), 8);
    assert!(layer.gamma().iter().all(|&g| g == 1.0));
    assert!(layer.beta().iter().all(|&b| b == 0.0));
}

#[test]
fn test_batchnorm_parameter_count_is_four_per_channel() {
    for channels in [1, 3, 16, 64] {
        let layer = BatchNorm4dLayer::new(channels, 2, 2);
        assert_eq!(layer.parameters(), 4 * channels);
    }
}

#[test]
fn test_batchnorm_from_config() {
    let config = BatchNormConfig {
        momentum: 0.5,
        epsilon: 1e-3,
    };
    let layer = BatchNorm4dLayer::from_config(2, 3, 3, &config).unwrap();
    assert_eq!(layer.momentum(), 0.5);
    assert_eq!(layer.epsilon(), 1e-3);
}

// ============================================================================
// Training Forward Tests
// ============================================================================

#[test]
fn test_batchnorm_concrete_two_sample_batch() {
    let mut layer = BatchNorm4dLayer::new(1, 1, 1);
    let input = Array4::from_shape_vec((2, 1, 1, 1), vec![2.0, 4.0]).unwrap();

    let (output, cache) = layer.train_forward(input.view());

    assert_relative_eq!(cache.last_mean()[0], 3.0);
    assert_relative_eq!(cache.last_var()[0], 1.0);
    assert_relative_eq!(cache.inv_var()[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(output[[0, 0, 0, 0]], -1.0, epsilon = 1e-6);
    assert_relative_eq!(output[[1, 0, 0, 0]], 1.0, epsilon = 1e-6);
    assert_relative_eq!(layer.running_mean()[0], 0.3, epsilon = 1e-6);
    assert_relative_eq!(layer.running_var()[0], 0.2, epsilon = 1e-6);
}

#[test]
fn test_batchnorm_output_matches_beta_and_gamma() {
    let mut layer = BatchNorm4dLayer::new(3, 3, 2);
    layer.gamma_mut().assign(&ndarray::array![2.0, 0.5, -1.5]);
    layer.beta_mut().assign(&ndarray::array![1.0, -3.0, 0.25]);

    let input = channel_shifted_batch(11, (6, 3, 3, 2));
    let (output, _) = layer.train_forward(input.view());

    for k in 0..3 {
        let (mean, var) = channel_mean_var(&output, k);
        let gamma = layer.gamma()[k];
        assert_relative_eq!(mean, layer.beta()[k], epsilon = 1e-4);
        assert_relative_eq!(var, gamma * gamma, max_relative = 1e-3);
    }
}

#[test]
fn test_batchnorm_cache_holds_batch_statistics() {
    let mut layer = BatchNorm4dLayer::new(2, 4, 4);
    let input = channel_shifted_batch(3, (5, 2, 4, 4));

    let (_, cache) = layer.train_forward(input.view());

    assert_eq!(cache.batch_size(), 5);
    assert_eq!(cache.observations(), 80);
    assert_eq!(cache.input_pre().dim(), input.dim());
    for k in 0..2 {
        let (mean, var) = channel_mean_var(&input, k);
        assert_relative_eq!(cache.last_mean()[k], mean, epsilon = 1e-5, max_relative = 1e-5);
        assert_relative_eq!(cache.last_var()[k], var, epsilon = 1e-5, max_relative = 1e-4);
        assert_relative_eq!(
            cache.inv_var()[k],
            1.0 / (cache.last_var()[k] + 1e-8).sqrt(),
            max_relative = 1e-6
        );
    }
}

#[test]
fn test_batchnorm_constant_input_stays_finite() {
    // Zero variance: epsilon is the only thing keeping inv_var finite
    let mut layer = BatchNorm4dLayer::new(2, 2, 2);
    layer.beta_mut().fill(0.75);
    let input = Array4::from_elem((3, 2, 2, 2), 5.0f32);

    let (output, cache) = layer.train_forward(input.view());

    assert!(cache.inv_var().iter().all(|v| v.is_finite() && *v > 0.0));
    for &value in output.iter() {
        assert!(value.is_finite());
        assert_relative_eq!(value, 0.75);
    }
}

// ============================================================================
// Running Statistics Tests
// ============================================================================

#[test]
fn test_batchnorm_running_statistics_after_one_step() {
    let mut layer = BatchNorm4dLayer::new(3, 2, 3);
    let input = channel_shifted_batch(21, (4, 3, 2, 3));

    let (_, cache) = layer.train_forward(input.view());

    let s = cache.observations() as f32;
    for k in 0..3 {
        assert_relative_eq!(
            layer.running_mean()[k],
            0.1 * cache.last_mean()[k],
            max_relative = 1e-5
        );
        assert_relative_eq!(
            layer.running_var()[k],
            0.1 * s / (s - 1.0) * cache.last_var()[k],
            max_relative = 1e-5
        );
    }
}

#[test]
fn test_batchnorm_running_statistics_follow_ema() {
    let config = BatchNormConfig {
        momentum: 0.6,
        ..Default::default()
    };
    let mut layer = BatchNorm4dLayer::from_config(1, 2, 2, &config).unwrap();

    let first = channel_shifted_batch(1, (3, 1, 2, 2));
    let second = channel_shifted_batch(2, (3, 1, 2, 2)).mapv(|x| x + 10.0);

    let (_, cache1) = layer.train_forward(first.view());
    let (_, cache2) = layer.train_forward(second.view());

    let correction = 12.0 / 11.0;
    let expected_mean = 0.6 * (0.4 * cache1.last_mean()[0]) + 0.4 * cache2.last_mean()[0];
    let expected_var = 0.6 * (0.4 * correction * cache1.last_var()[0])
        + 0.4 * correction * cache2.last_var()[0];

    assert_relative_eq!(layer.running_mean()[0], expected_mean, max_relative = 1e-5);
    assert_relative_eq!(layer.running_var()[0], expected_var, max_relative = 1e-5);
}

#[test]
fn test_batchnorm_running_statistics_converge() {
    let mut layer = BatchNorm4dLayer::new(2, 3, 3);
    let input = channel_shifted_batch(5, (4, 2, 3, 3));

    let mut cache = ForwardCache::for_layer(&layer);
    let mut output = Array4::zeros(input.dim());
    for _ in 0..200 {
        layer.train_forward_into(input.view(), output.view_mut(), &mut cache);
    }

    let s = cache.observations() as f32;
    for k in 0..2 {
        assert_relative_eq!(
            layer.running_mean()[k],
            cache.last_mean()[k],
            epsilon = 1e-4,
            max_relative = 1e-4
        );
        assert_relative_eq!(
            layer.running_var()[k],
            s / (s - 1.0) * cache.last_var()[k],
            max_relative = 1e-4
        );
    }
}

// ============================================================================
// Inference Tests
// ============================================================================

#[test]
fn test_batchnorm_inference_uses_running_statistics() {
    let mut layer = BatchNorm4dLayer::new(2, 2, 1);
    layer.gamma_mut().assign(&ndarray::array![1.5, -0.5]);
    layer.beta_mut().assign(&ndarray::array![0.2, 2.0]);
    layer.train_forward(channel_shifted_batch(8, (4, 2, 2, 1)).view());

    let input = channel_shifted_batch(9, (3, 2, 2, 1));
    let output = layer.inference_forward(input.view());

    for ((b, k, w, h), &value) in output.indexed_iter() {
        let expected = layer.gamma()[k] * (input[[b, k, w, h]] - layer.running_mean()[k])
            / (layer.running_var()[k] + layer.epsilon()).sqrt()
            + layer.beta()[k];
        assert_relative_eq!(value, expected, max_relative = 1e-5, epsilon = 1e-6);
    }
}

#[test]
fn test_batchnorm_inference_is_deterministic_and_stateless() {
    let mut layer = BatchNorm4dLayer::new(3, 2, 2);
    layer.train_forward(channel_shifted_batch(4, (5, 3, 2, 2)).view());

    let running_mean = layer.running_mean().clone();
    let running_var = layer.running_var().clone();
    let input = channel_shifted_batch(6, (2, 3, 2, 2));

    let first = layer.inference_forward(input.view());
    let second = layer.inference_forward(input.view());

    assert_eq!(first, second);
    assert_eq!(layer.running_mean(), &running_mean);
    assert_eq!(layer.running_var(), &running_var);
}

#[test]
fn test_batchnorm_inference_ignores_batch_composition() {
    let mut layer = BatchNorm4dLayer::new(2, 2, 2);
    layer.train_forward(channel_shifted_batch(12, (4, 2, 2, 2)).view());

    let batch = channel_shifted_batch(13, (4, 2, 2, 2));
    let single = batch.slice(ndarray::s![0..1, .., .., ..]).to_owned();

    let batch_output = layer.inference_forward(batch.view());
    let single_output = layer.inference_forward(single.view());

    assert_eq!(
        batch_output.index_axis(Axis(0), 0),
        single_output.index_axis(Axis(0), 0)
    );
}

#[test]
fn test_batchnorm_training_and_inference_differ() {
    // With zero running statistics, inference divides by sqrt(epsilon)
    let mut layer = BatchNorm4dLayer::new(1, 2, 2);
    let input = channel_shifted_batch(14, (2, 1, 2, 2));

    let untrained = layer.inference_forward(input.view());
    let (train_output, _) = layer.train_forward(input.view());

    assert!(untrained
        .iter()
        .zip(train_output.iter())
        .any(|(a, b)| (a - b).abs() > 1e-3));
}

// ============================================================================
// Weight Backup Tests
// ============================================================================

#[test]
fn test_batchnorm_restore_keeps_running_statistics() {
    let mut layer = BatchNorm4dLayer::new(2, 2, 2);
    layer.backup_weights();

    layer.gamma_mut().fill(3.0);
    layer.train_forward(channel_shifted_batch(15, (3, 2, 2, 2)).view());
    let running_mean = layer.running_mean().clone();

    assert!(layer.restore_weights());
    assert!(layer.gamma().iter().all(|&g| g == 1.0));
    assert_eq!(layer.running_mean(), &running_mean);
}

#[test]
#[should_panic(expected = "output shape mismatch")]
fn test_batchnorm_mismatched_output_panics() {
    let mut layer = BatchNorm4dLayer::new(2, 2, 2);
    let input = Array4::<f32>::zeros((3, 2, 2, 2));
    let mut output = Array4::<f32>::zeros((2, 2, 2, 2));
    let mut cache = ForwardCache::for_layer(&layer);
    layer.train_forward_into(input.view(), output.view_mut(), &mut cache);
}
