//! LSTM-style recurrent regressor.
//!
//! Inputs are feature rows reshaped as (N, 1, F); each sample runs one step
//! through two stacked LSTM cells. Cell weights are frozen at random
//! initialisation and the dense readout is trained (see [`Readout`]).

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::readout::Readout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmConfig {
    pub hidden: usize,
    pub layers: usize,
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden: 100,
            layers: 2,
            dropout: 0.25,
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-2,
            seed: 42,
        }
    }
}

/// One LSTM cell's gate parameters, stacked [input, forget, cell, output].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LstmCell {
    w_x: Array2<f64>,
    w_h: Array2<f64>,
    bias: Array1<f64>,
    hidden: usize,
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

impl LstmCell {
    fn new(rng: &mut StdRng, input: usize, hidden: usize) -> Self {
        let bound = (1.0 / input.max(1) as f64).sqrt();
        Self {
            w_x: Array2::random_using((input, 4 * hidden), Uniform::new(-bound, bound), rng),
            w_h: Array2::random_using((hidden, 4 * hidden), Uniform::new(-bound, bound), rng),
            bias: Array1::zeros(4 * hidden),
            hidden,
        }
    }

    /// Single-step forward from zero state.
    fn step(&self, x: &Array1<f64>) -> Array1<f64> {
        let h_prev = Array1::zeros(self.hidden);
        let gates = x.dot(&self.w_x) + h_prev.dot(&self.w_h) + &self.bias;
        let h = self.hidden;
        let mut h_next = Array1::zeros(h);
        for u in 0..h {
            let i_g = sigmoid(gates[u]);
            let c_hat = gates[2 * h + u].tanh();
            let o_g = sigmoid(gates[3 * h + u]);
            // Zero previous cell state, so the forget path contributes
            // nothing and c = i · ĉ.
            let c = i_g * c_hat;
            h_next[u] = o_g * c.tanh();
        }
        h_next
    }
}

/// Reservoir-style model: the recurrent cells stay fixed after random
/// initialisation and only the linear readout is fit to the targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmRegressor {
    config: LstmConfig,
    cells: Vec<LstmCell>,
    readout: Readout,
}

impl LstmRegressor {
    fn hidden_states(cells: &[LstmCell], x: &Array2<f64>) -> Array2<f64> {
        let hidden = cells.last().map_or(0, |c| c.hidden);
        let mut out = Array2::zeros((x.nrows(), hidden));
        for (i, row) in x.outer_iter().enumerate() {
            let mut state = row.to_owned();
            for cell in cells {
                state = cell.step(&state);
            }
            out.row_mut(i).assign(&state);
        }
        out
    }

    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: LstmConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut cells = Vec::with_capacity(config.layers);
        let mut input = x.ncols();
        for _ in 0..config.layers.max(1) {
            cells.push(LstmCell::new(&mut rng, input, config.hidden));
            input = config.hidden;
        }

        let h = Self::hidden_states(&cells, x);
        let readout = Readout::fit(
            &h,
            y,
            config.epochs,
            config.batch_size,
            config.learning_rate,
            config.dropout,
            config.seed,
        );

        Self {
            config,
            cells,
            readout,
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let h = Self::hidden_states(&self.cells, x);
        self.readout.predict(&h)
    }
}
