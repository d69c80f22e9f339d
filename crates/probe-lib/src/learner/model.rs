//! Single-input regression network trained online
//!
//! One dense hidden layer of ReLU units feeding a linear output, optimized
//! with Adam on squared error. Every training call runs a fixed number of
//! epochs over the one new sample.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::iter;

/// Width of the hidden layer
pub const HIDDEN_UNITS: usize = 64;

/// Latency is divided by this before entering the network (ms -> s)
pub const DEFAULT_INPUT_SCALE: f64 = 1000.0;

/// Optimizer settings applied on every training call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub epochs_per_sample: u32,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            epochs_per_sample: 10,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AdamState {
    step: u64,
    first_moment: Vec<f64>,
    second_moment: Vec<f64>,
}

impl AdamState {
    fn new(len: usize) -> Self {
        Self {
            step: 0,
            first_moment: vec![0.0; len],
            second_moment: vec![0.0; len],
        }
    }
}

/// Regression parameters plus the number of samples trained on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    input_scale: f64,
    hidden_weights: Vec<f64>,
    hidden_bias: Vec<f64>,
    output_weights: Vec<f64>,
    output_bias: f64,
    optimizer: AdamState,
    sample_count: u64,
}

const PARAM_COUNT: usize = 3 * HIDDEN_UNITS + 1;

impl ModelState {
    /// Fresh model with Glorot-uniform weights and zero biases.
    ///
    /// Output weights start non-negative so an untrained model never emits a
    /// negative score for a non-negative latency.
    pub fn initialize(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (6.0 / (1.0 + HIDDEN_UNITS as f64)).sqrt();

        let hidden_weights = (0..HIDDEN_UNITS)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        let output_weights = (0..HIDDEN_UNITS)
            .map(|_| rng.random_range(0.0..limit))
            .collect();

        Self {
            input_scale: DEFAULT_INPUT_SCALE,
            hidden_weights,
            hidden_bias: vec![0.0; HIDDEN_UNITS],
            output_weights,
            output_bias: 0.0,
            optimizer: AdamState::new(PARAM_COUNT),
            sample_count: 0,
        }
    }

    /// Model that predicts `score` for every input
    pub fn constant(score: f64) -> Self {
        Self {
            input_scale: DEFAULT_INPUT_SCALE,
            hidden_weights: vec![0.0; HIDDEN_UNITS],
            hidden_bias: vec![0.0; HIDDEN_UNITS],
            output_weights: vec![0.0; HIDDEN_UNITS],
            output_bias: score,
            optimizer: AdamState::new(PARAM_COUNT),
            sample_count: 0,
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn predict(&self, latency_ms: f64) -> f64 {
        let (_, output) = self.forward(latency_ms / self.input_scale);
        output
    }

    /// Fit the model to one sample and count it. Returns the squared error
    /// after the last epoch.
    pub fn train(&mut self, latency_ms: f64, target: f64, hyper: &Hyperparameters) -> f64 {
        let x = latency_ms / self.input_scale;
        let mut grads = vec![0.0; PARAM_COUNT];

        for _ in 0..hyper.epochs_per_sample {
            let (hidden, output) = self.forward(x);
            let grad_out = 2.0 * (output - target);

            for i in 0..HIDDEN_UNITS {
                let grad_hidden = if hidden[i] > 0.0 {
                    grad_out * self.output_weights[i]
                } else {
                    0.0
                };
                grads[i] = grad_hidden * x;
                grads[HIDDEN_UNITS + i] = grad_hidden;
                grads[2 * HIDDEN_UNITS + i] = grad_out * hidden[i];
            }
            grads[3 * HIDDEN_UNITS] = grad_out;

            self.apply_adam(&grads, hyper);
        }

        self.sample_count += 1;

        let error = self.predict(latency_ms) - target;
        error * error
    }

    /// Check shapes and values after deserialization
    pub fn validate(&self) -> Result<(), String> {
        let layers = [
            ("hidden_weights", self.hidden_weights.len()),
            ("hidden_bias", self.hidden_bias.len()),
            ("output_weights", self.output_weights.len()),
        ];
        for (name, len) in layers {
            if len != HIDDEN_UNITS {
                return Err(format!("{} has {} entries, expected {}", name, len, HIDDEN_UNITS));
            }
        }

        if self.optimizer.first_moment.len() != PARAM_COUNT
            || self.optimizer.second_moment.len() != PARAM_COUNT
        {
            return Err("optimizer moments do not match parameter count".to_string());
        }

        if !(self.input_scale.is_finite() && self.input_scale > 0.0) {
            return Err(format!("invalid input scale {}", self.input_scale));
        }

        let all_finite = self
            .parameters()
            .chain(self.optimizer.first_moment.iter().copied())
            .chain(self.optimizer.second_moment.iter().copied())
            .all(f64::is_finite);
        if !all_finite {
            return Err("non-finite parameter".to_string());
        }

        Ok(())
    }

    fn forward(&self, x: f64) -> (Vec<f64>, f64) {
        let hidden: Vec<f64> = self
            .hidden_weights
            .iter()
            .zip(&self.hidden_bias)
            .map(|(w, b)| (w * x + b).max(0.0))
            .collect();

        let output = hidden
            .iter()
            .zip(&self.output_weights)
            .map(|(h, w)| h * w)
            .sum::<f64>()
            + self.output_bias;

        (hidden, output)
    }

    fn parameters(&self) -> impl Iterator<Item = f64> + '_ {
        self.hidden_weights
            .iter()
            .chain(&self.hidden_bias)
            .chain(&self.output_weights)
            .chain(iter::once(&self.output_bias))
            .copied()
    }

    fn apply_adam(&mut self, grads: &[f64], hyper: &Hyperparameters) {
        let optimizer = &mut self.optimizer;
        optimizer.step += 1;
        let bias1 = 1.0 - hyper.beta1.powf(optimizer.step as f64);
        let bias2 = 1.0 - hyper.beta2.powf(optimizer.step as f64);

        let params = self
            .hidden_weights
            .iter_mut()
            .chain(self.hidden_bias.iter_mut())
            .chain(self.output_weights.iter_mut())
            .chain(iter::once(&mut self.output_bias));

        let moments = optimizer
            .first_moment
            .iter_mut()
            .zip(optimizer.second_moment.iter_mut());

        for ((param, grad), (m, v)) in params.zip(grads).zip(moments) {
            *m = hyper.beta1 * *m + (1.0 - hyper.beta1) * grad;
            *v = hyper.beta2 * *v + (1.0 - hyper.beta2) * grad * grad;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *param -= hyper.learning_rate * m_hat / (v_hat.sqrt() + hyper.epsilon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_seeded() {
        assert_eq!(ModelState::initialize(7), ModelState::initialize(7));
        assert_ne!(ModelState::initialize(7), ModelState::initialize(8));
    }

    #[test]
    fn test_untrained_prediction_non_negative() {
        let model = ModelState::initialize(42);
        for latency in [0.0, 50.0, 400.0, 2000.0, 10_000.0] {
            let score = model.predict(latency);
            assert!(score.is_finite());
            assert!(score >= 0.0, "score {} for {}ms", score, latency);
        }
    }

    #[test]
    fn test_constant_model() {
        let model = ModelState::constant(2500.0);
        assert_eq!(model.predict(400.0), 2500.0);
        assert_eq!(model.predict(0.0), 2500.0);
    }

    #[test]
    fn test_training_moves_toward_target() {
        let mut model = ModelState::initialize(7);
        let hyper = Hyperparameters::default();
        let target = 1.0;
        let before = (model.predict(100.0) - target).abs();

        for _ in 0..50 {
            model.train(100.0, target, &hyper);
        }

        let after = (model.predict(100.0) - target).abs();
        assert!(after < before, "distance {} -> {}", before, after);
        assert_eq!(model.sample_count(), 50);
    }

    #[test]
    fn test_training_on_own_prediction_is_stable() {
        let mut model = ModelState::initialize(3);
        let hyper = Hyperparameters::default();
        let s0 = model.predict(100.0);

        for _ in 0..50 {
            model.train(100.0, s0, &hyper);
        }

        assert!((model.predict(100.0) - s0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_shape() {
        let mut model = ModelState::initialize(1);
        assert!(model.validate().is_ok());

        model.hidden_bias.push(0.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut model = ModelState::initialize(1);
        model.output_bias = f64::NAN;
        assert!(model.validate().is_err());
    }
}
