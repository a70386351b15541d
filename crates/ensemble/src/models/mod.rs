//! Base predictors and the serialised artifact envelope.
//!
//! Every trained predictor is stored as an opaque JSON blob pairing the
//! fitted model with the standardiser from its training split. The kind
//! tag recorded in the registry metadata selects the loader.

pub mod attention;
pub mod conv;
pub mod forest;
pub mod gbm;
pub mod mlp;
pub mod readout;
pub mod recurrent;
pub mod tree;

use common::{Error, ModelKind, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::scaler::StandardScaler;
use attention::AttentionRegressor;
use conv::ConvRegressor;
use forest::BaggedForest;
use gbm::{GbmClassifier, GradientBoost};
use mlp::MlpRegressor;
use recurrent::LstmRegressor;

/// A trained predictor plus the scaler fitted alongside it. The meta
/// classifier consumes raw base predictions and carries no scaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", content = "payload")]
pub enum ModelArtifact {
    RandomForest {
        scaler: StandardScaler,
        model: BaggedForest,
    },
    GradientBoost {
        scaler: StandardScaler,
        model: GradientBoost,
    },
    ExtraTrees {
        scaler: StandardScaler,
        model: BaggedForest,
    },
    Mlp {
        scaler: StandardScaler,
        model: MlpRegressor,
    },
    Lstm {
        scaler: StandardScaler,
        model: LstmRegressor,
    },
    Attention {
        scaler: StandardScaler,
        model: AttentionRegressor,
    },
    Conv {
        scaler: StandardScaler,
        model: ConvRegressor,
    },
    Meta {
        model: GbmClassifier,
    },
}

impl ModelArtifact {
    /// Registry name for this predictor.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RandomForest { .. } => "random_forest",
            Self::GradientBoost { .. } => "gradient_boost",
            Self::ExtraTrees { .. } => "extra_trees",
            Self::Mlp { .. } => "mlp",
            Self::Lstm { .. } => "lstm",
            Self::Attention { .. } => "attention",
            Self::Conv { .. } => "conv",
            Self::Meta { .. } => "meta",
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::RandomForest { .. } | Self::GradientBoost { .. } | Self::ExtraTrees { .. } => {
                ModelKind::Tree
            }
            Self::Mlp { .. } => ModelKind::Mlp,
            Self::Lstm { .. } => ModelKind::Rnn,
            Self::Attention { .. } => ModelKind::Transformer,
            Self::Conv { .. } => ModelKind::Cnn,
            Self::Meta { .. } => ModelKind::Meta,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn scaler(&self) -> Option<&StandardScaler> {
        match self {
            Self::RandomForest { scaler, .. }
            | Self::GradientBoost { scaler, .. }
            | Self::ExtraTrees { scaler, .. }
            | Self::Mlp { scaler, .. }
            | Self::Lstm { scaler, .. }
            | Self::Attention { scaler, .. }
            | Self::Conv { scaler, .. } => Some(scaler),
            Self::Meta { .. } => None,
        }
    }

    /// Run inference on a raw feature batch. Inputs are standardised with
    /// the scaler captured at training time; the meta classifier returns
    /// its probability output.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if let Some(scaler) = self.scaler() {
            if x.ncols() != scaler.mean.len() {
                return Err(Error::Model(format!(
                    "{}: expected {} features, got {}",
                    self.name(),
                    scaler.mean.len(),
                    x.ncols()
                )));
            }
        }
        let out = match self {
            Self::RandomForest { scaler, model } | Self::ExtraTrees { scaler, model } => {
                model.predict(&scaler.transform(x))
            }
            Self::GradientBoost { scaler, model } => model.predict(&scaler.transform(x)),
            Self::Mlp { scaler, model } => model.predict(&scaler.transform(x)),
            Self::Lstm { scaler, model } => model.predict(&scaler.transform(x)),
            Self::Attention { scaler, model } => model.predict(&scaler.transform(x)),
            Self::Conv { scaler, model } => model.predict(&scaler.transform(x)),
            Self::Meta { model } => model.predict_proba(x),
        };
        if out.iter().any(|v| !v.is_finite()) {
            return Err(Error::Model(format!(
                "{}: non-finite prediction",
                self.name()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forest::ForestConfig;
    use gbm::GbmConfig;

    fn toy_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 6), |(i, j)| ((i * 5 + j) as f64 * 0.19).sin());
        let y = Array1::from_shape_fn(60, |i| (i as f64 * 0.01).sin());
        (x, y)
    }

    #[test]
    fn artifact_round_trip_preserves_predictions() {
        let (x, y) = toy_data();
        let scaler = StandardScaler::fit(&x);
        let model = BaggedForest::fit(
            &scaler.transform(&x),
            &y,
            ForestConfig {
                n_trees: 10,
                ..ForestConfig::random_forest()
            },
        );
        let artifact = ModelArtifact::RandomForest { scaler, model };
        let before = artifact.predict(&x).unwrap();

        let bytes = artifact.encode().unwrap();
        let restored = ModelArtifact::decode(&bytes).unwrap();
        assert_eq!(restored.name(), "random_forest");
        assert_eq!(restored.kind(), ModelKind::Tree);
        assert_eq!(before, restored.predict(&x).unwrap());
    }

    #[test]
    fn shape_mismatch_is_a_model_error() {
        let (x, y) = toy_data();
        let scaler = StandardScaler::fit(&x);
        let model = GradientBoost::fit(
            &scaler.transform(&x),
            &y,
            GbmConfig {
                n_estimators: 5,
                ..GbmConfig::default()
            },
        );
        let artifact = ModelArtifact::GradientBoost { scaler, model };
        let narrow = Array2::zeros((4, 2));
        assert!(matches!(
            artifact.predict(&narrow),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn meta_artifact_outputs_probabilities() {
        let x = Array2::from_shape_fn((50, 3), |(i, j)| ((i + j) as f64 * 0.3).cos());
        let y = Array1::from_shape_fn(50, |i| if i % 2 == 0 { 1.0 } else { 0.0 });
        let model = GbmClassifier::fit(
            &x,
            &y,
            GbmConfig {
                n_estimators: 10,
                ..GbmConfig::default()
            },
        );
        let artifact = ModelArtifact::Meta { model };
        let proba = artifact.predict(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
