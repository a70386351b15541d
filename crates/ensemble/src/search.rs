//! Random hyperparameter search over fixed per-kind grids.
//!
//! Each trial samples one configuration from the kind's grid, fits on the
//! training split and scores by training-split MSE. The best model is
//! kept. Trial counts are small, so a plain random sweep is used instead
//! of anything sequential.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::metrics::mse;
use crate::models::attention::{AttentionConfig, AttentionRegressor};
use crate::models::conv::{ConvConfig, ConvRegressor};
use crate::models::forest::{BaggedForest, ForestConfig};
use crate::models::gbm::{GbmConfig, GradientBoost};
use crate::models::mlp::{MlpConfig, MlpRegressor};
use crate::models::recurrent::{LstmConfig, LstmRegressor};

fn pick<T: Copy>(rng: &mut StdRng, options: &[T]) -> T {
    *options.choose(rng).unwrap_or(&options[0])
}

/// Fit `trials` sampled configurations and keep the one with the lowest
/// training MSE.
fn sweep<C, M>(
    x: &Array2<f64>,
    y: &Array1<f64>,
    trials: usize,
    seed: u64,
    sample: impl Fn(&mut StdRng, u64) -> C,
    fit: impl Fn(&Array2<f64>, &Array1<f64>, C) -> M,
    predict: impl Fn(&M, &Array2<f64>) -> Array1<f64>,
) -> M {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(f64, M)> = None;
    for trial in 0..trials.max(1) {
        let config = sample(&mut rng, seed.wrapping_add(trial as u64));
        let model = fit(x, y, config);
        let score = mse(&predict(&model, x), y);
        let better = match &best {
            Some((s, _)) => score.is_finite() && score < *s,
            None => true,
        };
        if better {
            best = Some((score, model));
        }
    }
    // trials >= 1 guarantees at least one candidate.
    best.map(|(_, m)| m).unwrap_or_else(|| {
        let config = sample(&mut StdRng::seed_from_u64(seed), seed);
        fit(x, y, config)
    })
}

pub fn search_random_forest(
    x: &Array2<f64>,
    y: &Array1<f64>,
    trials: usize,
    seed: u64,
) -> BaggedForest {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| ForestConfig {
            n_trees: pick(rng, &[100, 120, 150]),
            max_depth: pick(rng, &[10, 11, 12]),
            seed,
            ..ForestConfig::random_forest()
        },
        BaggedForest::fit,
        BaggedForest::predict,
    )
}

pub fn search_extra_trees(
    x: &Array2<f64>,
    y: &Array1<f64>,
    trials: usize,
    seed: u64,
) -> BaggedForest {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| ForestConfig {
            n_trees: pick(rng, &[100, 120, 150]),
            max_depth: pick(rng, &[10, 11, 12]),
            seed,
            ..ForestConfig::extra_trees()
        },
        BaggedForest::fit,
        BaggedForest::predict,
    )
}

pub fn search_gradient_boost(
    x: &Array2<f64>,
    y: &Array1<f64>,
    trials: usize,
    seed: u64,
) -> GradientBoost {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| GbmConfig {
            n_estimators: pick(rng, &[50, 100, 150]),
            learning_rate: pick(rng, &[0.05, 0.1, 0.2]),
            max_depth: pick(rng, &[3, 5, 7]),
            seed,
            ..GbmConfig::default()
        },
        GradientBoost::fit,
        GradientBoost::predict,
    )
}

pub fn search_mlp(x: &Array2<f64>, y: &Array1<f64>, trials: usize, seed: u64) -> MlpRegressor {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| MlpConfig {
            learning_rate: pick(rng, &[1e-3, 5e-3, 1e-2]),
            batch_size: pick(rng, &[16, 32, 64]),
            seed,
            ..MlpConfig::default()
        },
        MlpRegressor::fit,
        MlpRegressor::predict,
    )
}

pub fn search_lstm(x: &Array2<f64>, y: &Array1<f64>, trials: usize, seed: u64) -> LstmRegressor {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| LstmConfig {
            hidden: pick(rng, &[50, 100]),
            dropout: pick(rng, &[0.2, 0.25, 0.3]),
            learning_rate: pick(rng, &[5e-3, 1e-2]),
            seed,
            ..LstmConfig::default()
        },
        LstmRegressor::fit,
        LstmRegressor::predict,
    )
}

pub fn search_attention(
    x: &Array2<f64>,
    y: &Array1<f64>,
    trials: usize,
    seed: u64,
) -> AttentionRegressor {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| AttentionConfig {
            d_model: pick(rng, &[64, 128]),
            heads: pick(rng, &[2, 4]),
            blocks: pick(rng, &[1, 2, 4]),
            seed,
            ..AttentionConfig::default()
        },
        AttentionRegressor::fit,
        AttentionRegressor::predict,
    )
}

pub fn search_conv(x: &Array2<f64>, y: &Array1<f64>, trials: usize, seed: u64) -> ConvRegressor {
    sweep(
        x,
        y,
        trials,
        seed,
        |rng, seed| ConvConfig {
            filters_per_kernel: pick(rng, &[4, 8]),
            pool_size: pick(rng, &[2, 3]),
            learning_rate: pick(rng, &[5e-3, 1e-2]),
            seed,
            ..ConvConfig::default()
        },
        ConvRegressor::fit,
        ConvRegressor::predict,
    )
}
