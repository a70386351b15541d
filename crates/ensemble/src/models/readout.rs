//! Trained linear readout shared by the sequence models.
//!
//! The recurrent, attention, and convolutional models use frozen random
//! feature extractors with a readout trained by mini-batch SGD, the same
//! shape as the corpus' reservoir-style trainers.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readout {
    pub weights: Array1<f64>,
    pub bias: f64,
}

impl Readout {
    /// Train on hidden features `h` (rows × units) against `y`.
    pub fn fit(
        h: &Array2<f64>,
        y: &Array1<f64>,
        epochs: usize,
        batch_size: usize,
        learning_rate: f64,
        dropout: f64,
        seed: u64,
    ) -> Self {
        let n = h.nrows();
        let units = h.ncols();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = Array1::zeros(units);
        let mut bias = 0.0;
        let batch = batch_size.min(n).max(1);
        let keep = 1.0 - dropout.clamp(0.0, 0.95);

        for _ in 0..epochs {
            for start in (0..n).step_by(batch) {
                let end = (start + batch).min(n);
                let hb = h.slice_axis(Axis(0), (start..end).into());
                let yb = y.slice(ndarray::s![start..end]);
                let m = (end - start) as f64;

                // Inverted dropout on the hidden features.
                let mask: Array1<f64> = if dropout > 0.0 {
                    Array1::from_shape_fn(units, |_| {
                        if rng.gen::<f64>() < keep {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    })
                } else {
                    Array1::ones(units)
                };

                let masked_w = &weights * &mask;
                let pred = hb.dot(&masked_w) + bias;
                let err = &pred - &yb.to_owned();

                let grad_w = hb.t().dot(&err).to_owned() * &mask * (2.0 / m);
                let grad_b = 2.0 * err.sum() / m;
                weights = weights - learning_rate * grad_w;
                bias -= learning_rate * grad_b;
            }
        }

        Self { weights, bias }
    }

    pub fn predict(&self, h: &Array2<f64>) -> Array1<f64> {
        h.dot(&self.weights) + self.bias
    }
}
