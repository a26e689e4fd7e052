// bn_regression.rs
// Drives a BatchNorm4dLayer through the full training sequence on synthetic data:
// train forward -> loss -> backward -> gradients -> SGD, then inference with the
// running statistics.
//
// Usage:
//   bn_regression [config.json]
//
// Every channel k is fed values with its own offset and spread. The loss asks the
// layer to produce target_gamma[k] * x_hat + target_beta[k], so gamma and beta should
// converge to the targets while the running statistics track the input distribution.

use std::env;
use std::process;

use ndarray::{Array1, Array4, Axis, Zip};
use rust_batch_norm::config::{load_config, TrainingConfig};
use rust_batch_norm::layers::{BatchNorm4dLayer, Layer};
use rust_batch_norm::optimizers::SGD;
use rust_batch_norm::utils::SimpleRng;

const SEED: u64 = 42;
const LOG_EVERY: usize = 20;

fn config_from_args(args: &[String]) -> TrainingConfig {
    match args.get(1) {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to load config {}: {}", path, err);
                process::exit(1);
            }
        },
        None => TrainingConfig::default(),
    }
}

fn channel_offset(k: usize) -> f32 {
    3.0 * k as f32
}

fn channel_spread(k: usize) -> f32 {
    1.0 + k as f32
}

// Uniform noise in [-1, 1) shifted and scaled per channel.
fn fill_batch(rng: &mut SimpleRng, batch: &mut Array4<f32>) {
    *batch = rng.uniform_batch(batch.dim(), -1.0, 1.0);
    for (k, mut plane) in batch.axis_iter_mut(Axis(1)).enumerate() {
        let (offset, spread) = (channel_offset(k), channel_spread(k));
        plane.mapv_inplace(|u| offset + spread * u);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let config = config_from_args(&args);

    let mut layer = match BatchNorm4dLayer::from_config(
        config.channels,
        config.width,
        config.height,
        &config.batch_norm,
    ) {
        Ok(layer) => layer,
        Err(err) => {
            eprintln!("Invalid layer config: {}", err);
            process::exit(1);
        }
    };

    let channels = config.channels;
    let target_gamma = Array1::from_shape_fn(channels, |k| 1.0 + 0.5 * k as f32);
    let target_beta = Array1::from_shape_fn(channels, |k| k as f32 - 1.0);

    let mut rng = SimpleRng::new(SEED);
    let mut optimizer = SGD::new(config.learning_rate);
    let mut context = layer.training_context(config.batch_size);
    let mut cache = layer.new_cache();
    let mut grad_input = Array4::<f32>::zeros(context.input.dim());

    println!(
        "Training {} on {}x{}x{}x{} batches for {} steps (lr = {})",
        layer.short_name(),
        config.batch_size,
        channels,
        config.width,
        config.height,
        config.steps,
        config.learning_rate
    );

    for step in 1..=config.steps {
        fill_batch(&mut rng, &mut context.input);
        layer.train_batch(&mut context, &mut cache);

        // d(0.5 * (y - t)^2) / dy with t = target_gamma * x_hat + target_beta
        let mut loss = 0.0f32;
        for k in 0..channels {
            let (tg, tb) = (target_gamma[k], target_beta[k]);
            Zip::from(context.errors.index_axis_mut(Axis(1), k))
                .and(context.output.index_axis(Axis(1), k))
                .and(cache.input_pre().index_axis(Axis(1), k))
                .for_each(|err, &out, &pre| {
                    *err = out - (tg * pre + tb);
                    loss += 0.5 * *err * *err;
                });
        }
        loss /= config.batch_size as f32;

        layer.adapt_errors(&mut context);
        layer.backward_batch(&context, &cache, grad_input.view_mut());
        layer.compute_gradients(&mut context, &cache);
        layer.update_with_optimizer(&context, &mut optimizer);

        if step % LOG_EVERY == 0 || step == 1 {
            println!("step {:4}  loss {:.6}", step, loss);
        }
    }

    println!();
    for k in 0..channels {
        println!(
            "channel {}: gamma {:.4} (target {:.4})  beta {:.4} (target {:.4})  running mean {:.4}  running var {:.4}",
            k,
            layer.gamma()[k],
            target_gamma[k],
            layer.beta()[k],
            target_beta[k],
            layer.running_mean()[k],
            layer.running_var()[k]
        );
    }

    // Inference on a fresh batch uses only the running statistics.
    let mut test_batch = Array4::<f32>::zeros(context.input.dim());
    fill_batch(&mut rng, &mut test_batch);
    let output = layer.inference_forward(test_batch.view());
    for (k, plane) in output.axis_iter(Axis(1)).enumerate() {
        let mean = plane.sum() / plane.len() as f32;
        println!(
            "inference channel {}: output mean {:.4} (expected about {:.4})",
            k, mean, target_beta[k]
        );
    }
}
