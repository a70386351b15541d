//! Bagged tree ensembles: random forest and extra-trees.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, Splitter, TreeConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features per split; None means sqrt(n_features).
    pub max_features: Option<usize>,
    /// Bootstrap row sampling (true for random forest, false for
    /// extra-trees).
    pub bootstrap: bool,
    pub splitter: Splitter,
    pub seed: u64,
}

impl ForestConfig {
    pub fn random_forest() -> Self {
        Self {
            n_trees: 120,
            max_depth: 11,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
            bootstrap: true,
            splitter: Splitter::Best,
            seed: 42,
        }
    }

    pub fn extra_trees() -> Self {
        Self {
            splitter: Splitter::Random,
            bootstrap: false,
            ..Self::random_forest()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedForest {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
}

impl BaggedForest {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: ForestConfig) -> Self {
        let n = x.nrows();
        let sqrt_features = ((x.ncols() as f64).sqrt().round() as usize).max(1);
        let max_features = config.max_features.unwrap_or(sqrt_features);

        let trees: Vec<RegressionTree> = (0..config.n_trees)
            .into_par_iter()
            .map(|t| {
                let seed = config.seed.wrapping_add(t as u64);
                let indices: Vec<usize> = if config.bootstrap {
                    let mut rng = StdRng::seed_from_u64(seed);
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit_indices(
                    x,
                    y,
                    &indices,
                    TreeConfig {
                        max_depth: config.max_depth,
                        min_samples_split: config.min_samples_split,
                        min_samples_leaf: config.min_samples_leaf,
                        max_features: Some(max_features),
                        splitter: config.splitter,
                        seed,
                    },
                )
            })
            .collect();

        Self { config, trees }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(x.nrows());
        for tree in &self.trees {
            out = out + tree.predict(x);
        }
        out / self.trees.len().max(1) as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 3), |(i, j)| (i as f64) * 0.1 + j as f64);
        let y = Array1::from_shape_fn(80, |i| (i as f64) * 0.2);
        (x, y)
    }

    #[test]
    fn forest_tracks_a_linear_target() {
        let (x, y) = toy();
        let forest = BaggedForest::fit(
            &x,
            &y,
            ForestConfig {
                n_trees: 20,
                ..ForestConfig::random_forest()
            },
        );
        let pred = forest.predict(&x);
        let err: f64 =
            pred.iter().zip(y.iter()).map(|(p, a)| (p - a).abs()).sum::<f64>() / y.len() as f64;
        assert!(err < 1.0, "mean error too large: {err}");
    }

    #[test]
    fn extra_trees_use_all_rows() {
        let (x, y) = toy();
        let forest = BaggedForest::fit(
            &x,
            &y,
            ForestConfig {
                n_trees: 5,
                ..ForestConfig::extra_trees()
            },
        );
        assert_eq!(forest.n_trees(), 5);
        assert!(!forest.config().bootstrap);
    }
}
