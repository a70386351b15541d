//! Inception-style 1-D convolutional regressor.
//!
//! Each feature row is treated as a one-channel signal of length F. An
//! inception block runs parallel convolutions with several kernel widths
//! plus a max-pool bottleneck path, global-average-pools every filter and
//! feeds the pooled activations to a trained readout. Convolution kernels
//! are frozen at random initialisation.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::readout::Readout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvConfig {
    pub kernel_sizes: Vec<usize>,
    pub filters_per_kernel: usize,
    pub pool_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            kernel_sizes: vec![3, 5, 9],
            filters_per_kernel: 8,
            pool_size: 3,
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConvFilter {
    kernel: Array1<f64>,
    bias: f64,
}

impl ConvFilter {
    fn new(rng: &mut StdRng, width: usize) -> Self {
        let bound = (1.0 / width.max(1) as f64).sqrt();
        Self {
            kernel: Array1::random_using(width, Uniform::new(-bound, bound), rng),
            bias: 0.0,
        }
    }

    /// Valid convolution, ReLU, global average pool. Signals shorter than
    /// the kernel contribute a single zero-padded window.
    fn apply(&self, signal: &[f64]) -> f64 {
        let w = self.kernel.len();
        let windows = signal.len().saturating_sub(w) + 1;
        let mut sum = 0.0;
        for start in 0..windows.max(1) {
            let mut acc = self.bias;
            for (k, coef) in self.kernel.iter().enumerate() {
                acc += coef * signal.get(start + k).copied().unwrap_or(0.0);
            }
            sum += acc.max(0.0);
        }
        sum / windows.max(1) as f64
    }
}

/// Convolution kernels act as a fixed random feature extractor; training
/// fits only the linear readout over the pooled activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvRegressor {
    config: ConvConfig,
    filters: Vec<ConvFilter>,
    readout: Readout,
}

impl ConvRegressor {
    fn pooled_width(config: &ConvConfig) -> usize {
        // One pooled value per filter plus one for the max-pool path.
        config.kernel_sizes.len() * config.filters_per_kernel.max(1) + 1
    }

    fn max_pool_mean(signal: &[f64], pool: usize) -> f64 {
        let pool = pool.max(1);
        let mut sum = 0.0;
        let mut count = 0usize;
        for chunk in signal.chunks(pool) {
            sum += chunk.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    fn encode(&self, x: &Array2<f64>) -> Array2<f64> {
        let width = Self::pooled_width(&self.config);
        let mut out = Array2::zeros((x.nrows(), width));
        for (i, row) in x.outer_iter().enumerate() {
            let signal: Vec<f64> = row.to_vec();
            for (j, filter) in self.filters.iter().enumerate() {
                out[[i, j]] = filter.apply(&signal);
            }
            out[[i, width - 1]] = Self::max_pool_mean(&signal, self.config.pool_size);
        }
        out
    }

    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: ConvConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut filters = Vec::new();
        for &width in &config.kernel_sizes {
            for _ in 0..config.filters_per_kernel.max(1) {
                filters.push(ConvFilter::new(&mut rng, width.max(1)));
            }
        }

        let mut model = Self {
            filters,
            readout: Readout {
                weights: Array1::zeros(Self::pooled_width(&config)),
                bias: 0.0,
            },
            config,
        };
        let h = model.encode(x);
        model.readout = Readout::fit(
            &h,
            y,
            model.config.epochs,
            model.config.batch_size,
            model.config.learning_rate,
            0.0,
            model.config.seed,
        );
        model
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        self.readout.predict(&self.encode(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_finite_and_deterministic() {
        let x = Array2::from_shape_fn((40, 20), |(i, j)| ((i + 2 * j) as f64 * 0.13).cos());
        let y = Array1::from_shape_fn(40, |i| (i as f64 * 0.01) - 0.2);
        let cfg = ConvConfig {
            epochs: 10,
            ..ConvConfig::default()
        };
        let a = ConvRegressor::fit(&x, &y, cfg.clone());
        let b = ConvRegressor::fit(&x, &y, cfg);
        let pa = a.predict(&x);
        assert!(pa.iter().all(|v| v.is_finite()));
        assert_eq!(pa, b.predict(&x));
    }

    #[test]
    fn handles_rows_narrower_than_kernel() {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| (i + j) as f64 * 0.1);
        let y = Array1::from_shape_fn(12, |i| i as f64 * 0.05);
        let model = ConvRegressor::fit(&x, &y, ConvConfig::default());
        assert!(model.predict(&x).iter().all(|v| v.is_finite()));
    }
}
