//! Trains the base predictors and the stacking meta classifier.

use chrono::Utc;
use ndarray::{Array1, Array2};
use tracing::{info, warn};

use common::{Error, ModelMetadata, Result};
use model_registry::ModelRegistry;

use crate::dataset::{Dataset, META_TARGET, REGRESSION_TARGET};
use crate::metrics::{classification_metrics, regression_metrics};
use crate::models::gbm::{GbmClassifier, GbmConfig};
use crate::models::ModelArtifact;
use crate::scaler::StandardScaler;
use crate::search;
use feature_engine::FeatureMatrix;

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Chronological train fraction, no shuffling.
    pub train_fraction: f64,
    /// Random search trials per predictor kind.
    pub search_trials: usize,
    pub seed: u64,
    /// Weight assigned to each newly registered base predictor.
    pub default_weight: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            search_trials: 20,
            seed: 42,
            default_weight: 0.25,
        }
    }
}

/// Outcome of one training run.
#[derive(Debug, Default)]
pub struct TrainReport {
    pub trained: Vec<String>,
    pub skipped: Vec<String>,
    pub meta_trained: bool,
}

pub struct EnsembleTrainer {
    config: TrainerConfig,
}

impl EnsembleTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    /// Train all base predictors on the feature matrix, register each one,
    /// then fit the stacking meta classifier on held-out base predictions.
    /// Succeeds iff at least one base predictor trains.
    pub fn train(&self, matrix: &FeatureMatrix, registry: &ModelRegistry) -> Result<TrainReport> {
        let dataset = Dataset::from_features(matrix)?;
        let (train, test) = dataset.chronological_split(self.config.train_fraction);
        if train.x.nrows() < 2 || test.x.nrows() < 1 {
            return Err(Error::Data(format!(
                "split too small to train on: {} train rows, {} test rows",
                train.x.nrows(),
                test.x.nrows()
            )));
        }

        let scaler = StandardScaler::fit(&train.x);
        let xt = scaler.transform(&train.x);
        let trials = self.config.search_trials;
        let seed = self.config.seed;

        let fits: Vec<(&str, Box<dyn Fn() -> ModelArtifact + '_>)> = vec![
            (
                "random_forest",
                Box::new(|| ModelArtifact::RandomForest {
                    scaler: scaler.clone(),
                    model: search::search_random_forest(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "gradient_boost",
                Box::new(|| ModelArtifact::GradientBoost {
                    scaler: scaler.clone(),
                    model: search::search_gradient_boost(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "extra_trees",
                Box::new(|| ModelArtifact::ExtraTrees {
                    scaler: scaler.clone(),
                    model: search::search_extra_trees(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "mlp",
                Box::new(|| ModelArtifact::Mlp {
                    scaler: scaler.clone(),
                    model: search::search_mlp(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "lstm",
                Box::new(|| ModelArtifact::Lstm {
                    scaler: scaler.clone(),
                    model: search::search_lstm(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "attention",
                Box::new(|| ModelArtifact::Attention {
                    scaler: scaler.clone(),
                    model: search::search_attention(&xt, &train.y, trials, seed),
                }),
            ),
            (
                "conv",
                Box::new(|| ModelArtifact::Conv {
                    scaler: scaler.clone(),
                    model: search::search_conv(&xt, &train.y, trials, seed),
                }),
            ),
        ];

        let mut report = TrainReport::default();
        let mut held_out: Vec<(String, Array1<f64>)> = Vec::new();

        for (name, fit) in fits {
            let artifact = fit();
            match self.register_base(registry, &artifact, &train, &test, &mut held_out) {
                Ok(()) => {
                    report.trained.push(name.to_string());
                }
                Err(e) => {
                    warn!(model = name, error = %e, "base predictor skipped");
                    report.skipped.push(name.to_string());
                }
            }
        }

        if report.trained.is_empty() {
            return Err(Error::Model("no base predictor trained".into()));
        }

        if held_out.len() >= 2 {
            match self.train_meta(registry, &held_out, &test) {
                Ok(()) => report.meta_trained = true,
                Err(e) => warn!(error = %e, "meta classifier skipped"),
            }
        } else {
            info!(
                base_models = held_out.len(),
                "fewer than two base predictors, meta classifier skipped"
            );
        }

        info!(
            trained = report.trained.len(),
            skipped = report.skipped.len(),
            meta = report.meta_trained,
            "ensemble training complete"
        );
        Ok(report)
    }

    fn register_base(
        &self,
        registry: &ModelRegistry,
        artifact: &ModelArtifact,
        train: &Dataset,
        test: &Dataset,
        held_out: &mut Vec<(String, Array1<f64>)>,
    ) -> Result<()> {
        let pred = artifact.predict(&test.x)?;
        let metrics = regression_metrics(&pred, &test.y);
        let metadata = ModelMetadata {
            name: artifact.name().to_string(),
            version: self.next_version(registry, artifact.name()),
            kind: artifact.kind(),
            feature_names: train.feature_names.clone(),
            target_name: REGRESSION_TARGET.to_string(),
            trained_at: Utc::now(),
            metrics,
            weight: self.config.default_weight,
        };
        registry.register(&artifact.encode()?, &metadata)?;
        held_out.push((artifact.name().to_string(), pred));
        Ok(())
    }

    /// Stack held-out base predictions column-wise and fit a gradient
    /// boosting classifier against the sign of the next return.
    fn train_meta(
        &self,
        registry: &ModelRegistry,
        held_out: &[(String, Array1<f64>)],
        test: &Dataset,
    ) -> Result<()> {
        let rows = test.x.nrows();
        let mut stacked = Array2::zeros((rows, held_out.len()));
        for (j, (_, pred)) in held_out.iter().enumerate() {
            stacked.column_mut(j).assign(pred);
        }
        let target = test.sign_target();

        let model = GbmClassifier::fit(&stacked, &target, GbmConfig::default());
        let labels = model.predict_label(&stacked);
        let metrics = classification_metrics(&labels, &target);

        let artifact = ModelArtifact::Meta { model };
        let metadata = ModelMetadata {
            name: artifact.name().to_string(),
            version: self.next_version(registry, artifact.name()),
            kind: artifact.kind(),
            feature_names: held_out.iter().map(|(n, _)| n.clone()).collect(),
            target_name: META_TARGET.to_string(),
            trained_at: Utc::now(),
            metrics,
            weight: 1.0,
        };
        registry.register(&artifact.encode()?, &metadata)?;
        Ok(())
    }

    fn next_version(&self, registry: &ModelRegistry, name: &str) -> u32 {
        match registry.load(name) {
            Ok((_, metadata)) => metadata.version + 1,
            Err(_) => 1,
        }
    }
}

/// Mean of the stacked predictions weighted by registry weight times
/// per-model confidence. Used when no meta classifier is registered.
pub fn weighted_mean(values: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = values.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    Some(values.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}
