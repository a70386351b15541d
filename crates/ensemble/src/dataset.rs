//! Training dataset construction and splitting.

use common::{Error, Result};
use feature_engine::FeatureMatrix;
use ndarray::{Array1, Array2, Axis};

/// Declared regression target for every base predictor.
pub const REGRESSION_TARGET: &str = "next_close_return";
/// Declared classification target for the meta-learner.
pub const META_TARGET: &str = "next_return_sign";

/// Aligned feature matrix and target vector for one symbol.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    /// Next-bar close return per row.
    pub y: Array1<f64>,
    pub feature_names: Vec<String>,
}

impl Dataset {
    /// Build a supervised dataset from a feature matrix. The target for row
    /// i is the close return from bar i to bar i+1; the final row has no
    /// target and is dropped.
    pub fn from_features(matrix: &FeatureMatrix) -> Result<Self> {
        let n = matrix.nrows();
        if n < 2 {
            return Err(Error::Data(format!(
                "need at least 2 rows to build targets, got {}",
                n
            )));
        }
        let close = matrix
            .column("close")
            .ok_or_else(|| Error::Data("feature matrix lacks close column".into()))?;

        let mut y = Array1::zeros(n - 1);
        for i in 0..n - 1 {
            let base = if close[i].abs() < 1e-9 { 1e-9 } else { close[i] };
            y[i] = (close[i + 1] - close[i]) / base;
        }

        let x = matrix.data.slice_axis(Axis(0), (0..n - 1).into()).to_owned();
        Ok(Self {
            x,
            y,
            feature_names: matrix.names.clone(),
        })
    }

    /// Single chronological split, no shuffle.
    pub fn chronological_split(&self, train_frac: f64) -> (Dataset, Dataset) {
        let n = self.x.nrows();
        let cut = ((n as f64 * train_frac) as usize).clamp(1, n.saturating_sub(1).max(1));
        let train = Dataset {
            x: self.x.slice_axis(Axis(0), (0..cut).into()).to_owned(),
            y: self.y.slice(ndarray::s![0..cut]).to_owned(),
            feature_names: self.feature_names.clone(),
        };
        let test = Dataset {
            x: self.x.slice_axis(Axis(0), (cut..n).into()).to_owned(),
            y: self.y.slice(ndarray::s![cut..]).to_owned(),
            feature_names: self.feature_names.clone(),
        };
        (train, test)
    }

    /// Binary sign target for the meta-learner: 1 when the return is
    /// positive, else 0.
    pub fn sign_target(&self) -> Array1<f64> {
        self.y.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }
}
