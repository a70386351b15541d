//! Multi-layer perceptron regressor with plain backprop.

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpConfig {
    pub hidden: Vec<usize>,
    pub max_iters: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: vec![100, 50],
            max_iters: 1000,
            learning_rate: 1e-3,
            batch_size: 32,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layer {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

impl Layer {
    fn new(rng: &mut StdRng, n_in: usize, n_out: usize) -> Self {
        let bound = (6.0 / (n_in + n_out) as f64).sqrt();
        Self {
            weights: Array2::random_using((n_in, n_out), Uniform::new(-bound, bound), rng),
            biases: Array1::zeros(n_out),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpRegressor {
    config: MlpConfig,
    layers: Vec<Layer>,
}

fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.0))
}

impl MlpRegressor {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: MlpConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut sizes = vec![x.ncols()];
        sizes.extend(&config.hidden);
        sizes.push(1);
        let mut layers: Vec<Layer> = sizes
            .windows(2)
            .map(|w| Layer::new(&mut rng, w[0], w[1]))
            .collect();

        let n = x.nrows();
        let batch = config.batch_size.min(n).max(1);

        for iter in 0..config.max_iters {
            let start = (iter * batch) % n;
            let end = (start + batch).min(n);
            let xb = x.slice_axis(Axis(0), (start..end).into()).to_owned();
            let yb = y.slice(ndarray::s![start..end]).to_owned();
            let m = xb.nrows() as f64;

            // Forward, keeping pre-activation inputs per layer.
            let mut activations = vec![xb.clone()];
            for (i, layer) in layers.iter().enumerate() {
                let z = activations.last().unwrap().dot(&layer.weights) + &layer.biases;
                let a = if i + 1 < layers.len() { relu(&z) } else { z };
                activations.push(a);
            }

            // Backward: MSE loss, ReLU hidden layers, identity output.
            let output = activations.last().unwrap().column(0).to_owned();
            let mut delta: Array2<f64> = {
                let diff = &output - &yb;
                diff.insert_axis(Axis(1)) * (2.0 / m)
            };
            for i in (0..layers.len()).rev() {
                let input = &activations[i];
                let grad_w = input.t().dot(&delta);
                let grad_b = delta.sum_axis(Axis(0));
                if i > 0 {
                    let upstream = delta.dot(&layers[i].weights.t());
                    // ReLU derivative gated on the forward activation.
                    delta = upstream * activations[i].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                }
                layers[i].weights = &layers[i].weights - &(config.learning_rate * grad_w);
                layers[i].biases = &layers[i].biases - &(config.learning_rate * grad_b);
            }
        }

        Self { config, layers }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut a = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = a.dot(&layer.weights) + &layer.biases;
            a = if i + 1 < self.layers.len() { relu(&z) } else { z };
        }
        a.column(0).to_owned()
    }
}
