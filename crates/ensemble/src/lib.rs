//! Heterogeneous predictor training and the stacked meta classifier.
//!
//! Seven base regressors predict the next-bar close return from the same
//! standardised feature split; a gradient boosting classifier is stacked
//! on their held-out predictions. Everything trained here lands in the
//! model registry as a versioned artifact.

pub mod dataset;
pub mod metrics;
pub mod models;
pub mod scaler;
pub mod search;
pub mod trainer;

pub use dataset::{Dataset, META_TARGET, REGRESSION_TARGET};
pub use models::ModelArtifact;
pub use scaler::StandardScaler;
pub use trainer::{weighted_mean, EnsembleTrainer, TrainReport, TrainerConfig};
