//! Gradient boosting: regressor for the base ensemble and a logistic-loss
//! classifier used as the stacking meta-learner.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, Splitter, TreeConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GbmConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

fn stage_config(config: &GbmConfig, stage: usize) -> TreeConfig {
    TreeConfig {
        max_depth: config.max_depth,
        min_samples_split: 2 * config.min_samples_leaf,
        min_samples_leaf: config.min_samples_leaf,
        max_features: None,
        splitter: Splitter::Best,
        seed: config.seed.wrapping_add(stage as u64),
    }
}

/// Least-squares gradient boosting regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoost {
    config: GbmConfig,
    base: f64,
    stages: Vec<RegressionTree>,
}

impl GradientBoost {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: GbmConfig) -> Self {
        let base = y.sum() / y.len().max(1) as f64;
        let mut current = Array1::from_elem(y.len(), base);
        let mut stages = Vec::with_capacity(config.n_estimators);

        for stage in 0..config.n_estimators {
            let residual = y - &current;
            let tree = RegressionTree::fit(x, &residual, stage_config(&config, stage));
            let update = tree.predict(x);
            current = current + config.learning_rate * &update;
            stages.push(tree);
        }

        Self { config, base, stages }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut out = Array1::from_elem(x.nrows(), self.base);
        for tree in &self.stages {
            out = out + self.config.learning_rate * &tree.predict(x);
        }
        out
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Gradient boosting classifier with logistic loss; the meta-learner over
/// stacked base predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmClassifier {
    config: GbmConfig,
    base_logit: f64,
    stages: Vec<RegressionTree>,
}

impl GbmClassifier {
    /// `y` holds 0/1 labels.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: GbmConfig) -> Self {
        let pos = y.sum() / y.len().max(1) as f64;
        let prior = pos.clamp(1e-6, 1.0 - 1e-6);
        let base_logit = (prior / (1.0 - prior)).ln();

        let mut logits = Array1::from_elem(y.len(), base_logit);
        let mut stages = Vec::with_capacity(config.n_estimators);

        for stage in 0..config.n_estimators {
            // Negative gradient of logistic loss: y − p.
            let gradient: Array1<f64> =
                y - &logits.mapv(sigmoid);
            let tree = RegressionTree::fit(x, &gradient, stage_config(&config, stage));
            let update = tree.predict(x);
            logits = logits + config.learning_rate * &update;
            stages.push(tree);
        }

        Self {
            config,
            base_logit,
            stages,
        }
    }

    /// Probability of the positive class per row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut logits = Array1::from_elem(x.nrows(), self.base_logit);
        for tree in &self.stages {
            logits = logits + self.config.learning_rate * &tree.predict(x);
        }
        logits.mapv(sigmoid)
    }

    pub fn predict_label(&self, x: &Array2<f64>) -> Array1<f64> {
        self.predict_proba(x).mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 })
    }
}
