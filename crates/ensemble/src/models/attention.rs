//! Attention-style sequence regressor.
//!
//! Rows enter as (N, 1, F): a projection to a small d-model, a stack of
//! encoder blocks (multi-head self-attention + feed-forward, residual
//! connections), then a trained readout over the final token. Projection
//! and block weights are frozen at random initialisation.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::readout::Readout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    pub d_model: usize,
    pub heads: usize,
    pub blocks: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            d_model: 64,
            heads: 4,
            blocks: 2,
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncoderBlock {
    w_q: Array2<f64>,
    w_k: Array2<f64>,
    w_v: Array2<f64>,
    w_o: Array2<f64>,
    ff_1: Array2<f64>,
    ff_2: Array2<f64>,
}

fn rand_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let bound = (1.0 / rows.max(1) as f64).sqrt();
    Array2::random_using((rows, cols), Uniform::new(-bound, bound), rng)
}

impl EncoderBlock {
    fn new(rng: &mut StdRng, d_model: usize) -> Self {
        Self {
            w_q: rand_matrix(rng, d_model, d_model),
            w_k: rand_matrix(rng, d_model, d_model),
            w_v: rand_matrix(rng, d_model, d_model),
            w_o: rand_matrix(rng, d_model, d_model),
            ff_1: rand_matrix(rng, d_model, 2 * d_model),
            ff_2: rand_matrix(rng, 2 * d_model, d_model),
        }
    }

    /// Single-token self-attention with a gated score in place of the
    /// degenerate softmax, followed by the usual residual + feed-forward
    /// structure.
    fn forward(&self, token: &Array1<f64>, heads: usize) -> Array1<f64> {
        let d = token.len();
        let head_dim = (d / heads.max(1)).max(1);

        let q = token.dot(&self.w_q);
        let k = token.dot(&self.w_k);
        let v = token.dot(&self.w_v);

        let mut attended = Array1::zeros(d);
        for h in 0..heads.max(1) {
            let lo = h * head_dim;
            let hi = (lo + head_dim).min(d);
            let score: f64 = q
                .slice(ndarray::s![lo..hi])
                .dot(&k.slice(ndarray::s![lo..hi]))
                / (head_dim as f64).sqrt();
            // Tanh gate keeps the Q/K interaction alive in the degenerate
            // single-key case, where a softmax would always return 1.
            let gate = 0.5 * (1.0 + score.tanh());
            let head = v.slice(ndarray::s![lo..hi]).mapv(|x| gate * x);
            attended.slice_mut(ndarray::s![lo..hi]).assign(&head);
        }
        let after_attn = token + &attended.dot(&self.w_o);

        let ff = after_attn
            .dot(&self.ff_1)
            .mapv(|v| v.max(0.0))
            .dot(&self.ff_2);
        &after_attn + &ff
    }
}

/// The encoder stack is a fixed random feature extractor; training fits
/// only the linear readout over the final token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionRegressor {
    config: AttentionConfig,
    projection: Array2<f64>,
    encoder: Vec<EncoderBlock>,
    readout: Readout,
}

impl AttentionRegressor {
    fn encode(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), self.config.d_model));
        for (i, row) in x.outer_iter().enumerate() {
            let mut token = row.dot(&self.projection);
            for block in &self.encoder {
                token = block.forward(&token, self.config.heads);
            }
            out.row_mut(i).assign(&token);
        }
        out
    }

    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: AttentionConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let projection = rand_matrix(&mut rng, x.ncols(), config.d_model);
        let encoder = (0..config.blocks.max(1))
            .map(|_| EncoderBlock::new(&mut rng, config.d_model))
            .collect();

        let mut model = Self {
            config: config.clone(),
            projection,
            encoder,
            readout: Readout {
                weights: Array1::zeros(config.d_model),
                bias: 0.0,
            },
        };
        let h = model.encode(x);
        model.readout = Readout::fit(
            &h,
            y,
            config.epochs,
            config.batch_size,
            config.learning_rate,
            0.0,
            config.seed,
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
        let x = Array2::from_shape_fn((30, 10), |(i, j)| ((i * 3 + j) as f64 * 0.21).sin());
        let y = Array1::from_shape_fn(30, |i| i as f64 * 0.02);
        let cfg = AttentionConfig {
            d_model: 16,
            heads: 2,
            blocks: 1,
            epochs: 10,
            ..AttentionConfig::default()
        };
        let a = AttentionRegressor::fit(&x, &y, cfg.clone());
        let b = AttentionRegressor::fit(&x, &y, cfg);
        let pa = a.predict(&x);
        let pb = b.predict(&x);
        assert!(pa.iter().all(|v| v.is_finite()));
        assert_eq!(pa, pb);
    }
}
