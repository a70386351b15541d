//! Scores a feature batch with the registered models and the rule-based
//! insight strategies, producing one Decision per call.

use ndarray::Array2;
use tracing::{debug, warn};

use common::{
    Action, Decision, Error, ModelKind, ModelMetadata, Prediction, Regime, Result,
};
use ensemble::{weighted_mean, ModelArtifact};
use feature_engine::insight::{self, InsightReport, MomentumState, TrendDirection};
use feature_engine::FeatureMatrix;
use model_registry::ModelRegistry;

const EPS: f64 = 1e-9;

// Composite score sub-term weights.
const W_MOMENTUM: f64 = 0.25;
const W_VOLUME: f64 = 0.20;
const W_RISK_ADJ: f64 = 0.20;
const W_REGIME: f64 = 0.15;
const W_CORRELATION: f64 = 0.20;

// Strategy voting weights.
const W_TREND_VOTE: f64 = 0.30;
const W_MOMENTUM_VOTE: f64 = 0.30;
const W_VOLATILITY_VOTE: f64 = 0.20;
const W_SENTIMENT_VOTE: f64 = 0.20;

const REGIME_BULL: f64 = 0.7;
const REGIME_BEAR: f64 = 0.3;

/// Per-model confidence derived from registry metrics:
/// `clip(1 − rmse / (|r2| + ε), 0, 1)`.
pub fn model_confidence(metadata: &ModelMetadata) -> f64 {
    let rmse = metadata.metric("rmse").unwrap_or(f64::MAX);
    let r2 = metadata.metric("r2").unwrap_or(0.0);
    (1.0 - rmse / (r2.abs() + EPS)).clamp(0.0, 1.0)
}

/// Strategy voting over the rule-based insights. Returns the winning
/// action, the winning accumulator value and a reasoning line per rule
/// that fired. Ties resolve hold > sell > buy.
pub fn vote(report: &InsightReport) -> (Action, f64, Vec<String>) {
    let mut buy = 0.0;
    let mut sell = 0.0;
    let mut hold = 0.0;
    let mut reasoning = Vec::new();

    match report.trend.direction {
        TrendDirection::Bullish => {
            buy += W_TREND_VOTE;
            reasoning.push(format!(
                "trend bullish (strength {:.2})",
                report.trend.strength
            ));
        }
        TrendDirection::Bearish => {
            sell += W_TREND_VOTE;
            reasoning.push(format!(
                "trend bearish (strength {:.2})",
                report.trend.strength
            ));
        }
        TrendDirection::Sideways => {
            hold += W_TREND_VOTE;
            reasoning.push("trend sideways".to_string());
        }
    }

    match report.momentum.state {
        MomentumState::Overbought => {
            sell += W_MOMENTUM_VOTE;
            reasoning.push(format!("overbought (rsi {:.1})", report.momentum.rsi_14));
        }
        MomentumState::Oversold => {
            buy += W_MOMENTUM_VOTE;
            reasoning.push(format!("oversold (rsi {:.1})", report.momentum.rsi_14));
        }
        MomentumState::Neutral => {
            hold += W_MOMENTUM_VOTE;
        }
    }

    // Elevated volatility argues for standing still; calm markets defer
    // to the trend.
    if report.volatility.high || report.volatility.band_expanding {
        hold += W_VOLATILITY_VOTE;
        reasoning.push("volatility elevated".to_string());
    } else {
        match report.trend.direction {
            TrendDirection::Bullish => buy += W_VOLATILITY_VOTE,
            TrendDirection::Bearish => sell += W_VOLATILITY_VOTE,
            TrendDirection::Sideways => hold += W_VOLATILITY_VOTE,
        }
    }

    match report.sentiment.mfi_signal {
        1 => {
            buy += W_SENTIMENT_VOTE;
            reasoning.push("money flow positive".to_string());
        }
        -1 => {
            sell += W_SENTIMENT_VOTE;
            reasoning.push("money flow negative".to_string());
        }
        _ => {
            hold += W_SENTIMENT_VOTE;
            if report.sentiment.volume_increasing {
                reasoning.push("volume above average".to_string());
            }
        }
    }

    // hold > sell > buy on ties.
    let (action, score) = if hold >= sell && hold >= buy {
        (Action::Hold, hold)
    } else if sell >= buy {
        (Action::Sell, sell)
    } else {
        (Action::Buy, buy)
    };
    (action, score, reasoning)
}

/// Regime score in [0, 1] from the trend insight: above 0.5 when
/// bullish, below when bearish, scaled by strength.
fn regime_score(report: &InsightReport) -> f64 {
    match report.trend.direction {
        TrendDirection::Bullish => 0.5 + 0.5 * report.trend.strength,
        TrendDirection::Bearish => 0.5 - 0.5 * report.trend.strength,
        TrendDirection::Sideways => 0.5,
    }
}

fn regime_label(score: f64) -> Regime {
    if score > REGIME_BULL {
        Regime::Bull
    } else if score < REGIME_BEAR {
        Regime::Bear
    } else {
        Regime::Sideways
    }
}

/// Rank of the last value within its batch column, in [0, 1]. Missing
/// columns rank neutral.
fn batch_rank(matrix: &FeatureMatrix, name: &str) -> f64 {
    let Some(col) = matrix.column(name) else {
        return 0.5;
    };
    let n = col.len();
    if n < 2 {
        return 0.5;
    }
    let last = col[n - 1];
    if !last.is_finite() {
        return 0.5;
    }
    let below = col.iter().filter(|v| **v <= last).count();
    (below as f64 - 1.0) / (n as f64 - 1.0)
}

/// Mean return over std of returns for the batch tail, squashed to
/// [0, 1].
fn risk_adjusted_return(matrix: &FeatureMatrix, window: usize) -> f64 {
    let Some(close) = matrix.column("close") else {
        return 0.5;
    };
    let n = close.len();
    if n < 3 {
        return 0.5;
    }
    let start = n.saturating_sub(window + 1);
    let returns: Vec<f64> = close[start..]
        .windows(2)
        .map(|w| (w[1] - w[0]) / (w[0].abs() + EPS))
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let sharpe = mean / (var.sqrt() + EPS);
    0.5 * (1.0 + sharpe.tanh())
}

/// Lag-1 autocorrelation of close returns mapped to [0, 1]; persistent
/// batches score high, mean-reverting ones low.
fn correlation_adjusted_score(matrix: &FeatureMatrix) -> f64 {
    let Some(close) = matrix.column("close") else {
        return 0.5;
    };
    if close.len() < 4 {
        return 0.5;
    }
    let returns: Vec<f64> = close
        .windows(2)
        .map(|w| (w[1] - w[0]) / (w[0].abs() + EPS))
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>();
    if var < EPS {
        return 0.5;
    }
    let cov = returns
        .windows(2)
        .map(|w| (w[0] - mean) * (w[1] - mean))
        .sum::<f64>();
    0.5 * (1.0 + (cov / var).clamp(-1.0, 1.0))
}

#[derive(Debug, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score one symbol's feature batch. Never fails: any scoring error
    /// collapses to a safe hold decision carrying the error class.
    pub fn decide(&self, matrix: &FeatureMatrix, registry: &ModelRegistry) -> Decision {
        let ts_ms = matrix.ts_ms.last().copied().unwrap_or_default();
        match self.score(matrix, registry, ts_ms) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(symbol = %matrix.symbol, error = %e, "scoring failed, holding");
                Decision::safe_hold(&matrix.symbol, ts_ms, &format!("scoring error: {e}"))
            }
        }
    }

    fn score(
        &self,
        matrix: &FeatureMatrix,
        registry: &ModelRegistry,
        ts_ms: i64,
    ) -> Result<Decision> {
        if matrix.nrows() == 0 {
            return Err(Error::Data("empty feature batch".into()));
        }

        let listed = registry.list()?;
        let mut meta_record: Option<ModelMetadata> = None;
        let mut predictions: Vec<Prediction> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();

        for (name, metadata) in &listed {
            if metadata.kind == ModelKind::Meta {
                meta_record = Some(metadata.clone());
                continue;
            }
            match self.run_model(matrix, registry, name, metadata, ts_ms) {
                Ok(pred) => {
                    weights.push(metadata.weight);
                    predictions.push(pred);
                }
                Err(e) => warn!(model = %name, error = %e, "model skipped"),
            }
        }

        if predictions.is_empty() {
            return Ok(Decision::safe_hold(
                &matrix.symbol,
                ts_ms,
                "no models available",
            ));
        }

        let ensemble_value = self.combine(&predictions, &weights, registry, meta_record)?;
        let report = insight::extract(matrix);
        let (action, vote_score, mut reasoning) = vote(&report);

        let regime = regime_score(&report);
        let composite = W_MOMENTUM * batch_rank(matrix, "rsi_14")
            + W_VOLUME * batch_rank(matrix, "volume")
            + W_RISK_ADJ * risk_adjusted_return(matrix, 14)
            + W_REGIME * regime
            + W_CORRELATION * correlation_adjusted_score(matrix);

        reasoning.push(format!(
            "ensemble {:.4} from {} models",
            ensemble_value,
            predictions.len()
        ));
        debug!(
            symbol = %matrix.symbol,
            action = action.label(),
            composite,
            ensemble_value,
            "decision scored"
        );

        Ok(Decision {
            symbol: matrix.symbol.clone(),
            ts_ms,
            action,
            confidence: vote_score.clamp(0.0, 1.0),
            composite_score: composite.clamp(0.0, 1.0),
            risk_score: 0.0,
            reasoning,
            regime: regime_label(regime),
        })
    }

    fn run_model(
        &self,
        matrix: &FeatureMatrix,
        registry: &ModelRegistry,
        name: &str,
        metadata: &ModelMetadata,
        ts_ms: i64,
    ) -> Result<Prediction> {
        if metadata.feature_names != matrix.names {
            return Err(Error::Model(format!(
                "{name}: feature columns differ from training"
            )));
        }
        let (bytes, _) = registry.load(name)?;
        let artifact = ModelArtifact::decode(&bytes)?;
        let values = artifact.predict(&matrix.data)?;
        let value = values
            .last()
            .copied()
            .ok_or_else(|| Error::Model(format!("{name}: empty prediction")))?;
        Ok(Prediction {
            model_name: name.to_string(),
            symbol: matrix.symbol.clone(),
            ts_ms,
            value,
            confidence: model_confidence(metadata),
        })
    }

    /// Meta probability when a meta classifier is registered and covers
    /// every base model; weighted mean of base values otherwise.
    fn combine(
        &self,
        predictions: &[Prediction],
        weights: &[f64],
        registry: &ModelRegistry,
        meta_record: Option<ModelMetadata>,
    ) -> Result<f64> {
        if let Some(meta) = meta_record {
            match self.meta_probability(predictions, registry, &meta) {
                Ok(p) => return Ok(p),
                Err(e) => warn!(error = %e, "meta classifier unusable, falling back"),
            }
        }
        let pairs: Vec<(f64, f64)> = predictions
            .iter()
            .zip(weights)
            .map(|(p, w)| (p.value, w * p.confidence))
            .collect();
        weighted_mean(&pairs).ok_or_else(|| Error::Model("all model weights are zero".into()))
    }

    fn meta_probability(
        &self,
        predictions: &[Prediction],
        registry: &ModelRegistry,
        meta: &ModelMetadata,
    ) -> Result<f64> {
        let mut row = Vec::with_capacity(meta.feature_names.len());
        for base in &meta.feature_names {
            let pred = predictions
                .iter()
                .find(|p| &p.model_name == base)
                .ok_or_else(|| Error::Model(format!("meta input {base} missing")))?;
            row.push(pred.value);
        }
        let (bytes, _) = registry.load(&meta.name)?;
        let artifact = ModelArtifact::decode(&bytes)?;
        let x = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| Error::Model(e.to_string()))?;
        let proba = artifact.predict(&x)?;
        proba
            .first()
            .copied()
            .ok_or_else(|| Error::Model("meta produced no output".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Bar;
    use ensemble::{EnsembleTrainer, TrainerConfig};
    use feature_engine::insight::{
        MomentumInsight, SentimentInsight, TrendInsight, VolatilityInsight,
    };
    use feature_engine::FeatureEngine;
    use tempfile::TempDir;

    fn report(
        direction: TrendDirection,
        momentum: MomentumState,
        high_vol: bool,
        mfi_signal: i8,
    ) -> InsightReport {
        InsightReport {
            trend: TrendInsight {
                direction,
                strength: 0.8,
                macd_confirms: false,
            },
            momentum: MomentumInsight {
                state: momentum,
                strength: 0.8,
                rsi_14: 50.0,
            },
            volatility: VolatilityInsight {
                high: high_vol,
                band_expanding: false,
            },
            sentiment: SentimentInsight {
                volume_increasing: false,
                mfi_signal,
            },
        }
    }

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + 8.0 * (t * 0.07).sin() + 0.02 * t;
                Bar {
                    exchange: "test".into(),
                    symbol: "BTC".into(),
                    interval: "1h".into(),
                    ts_ms: i as i64 * 3_600_000,
                    open: close - 0.1,
                    high: close + 0.4,
                    low: close - 0.4,
                    close,
                    volume: 900.0 + 40.0 * (t * 0.13).cos(),
                }
            })
            .collect()
    }

    #[test]
    fn bullish_calm_market_votes_buy() {
        let r = report(TrendDirection::Bullish, MomentumState::Oversold, false, 1);
        let (action, score, reasoning) = vote(&r);
        assert_eq!(action, Action::Buy);
        assert!((score - 1.0).abs() < 1e-12);
        assert!(reasoning.iter().any(|s| s.contains("bullish")));
    }

    #[test]
    fn overbought_bearish_market_votes_sell() {
        let r = report(TrendDirection::Bearish, MomentumState::Overbought, false, -1);
        let (action, score, _) = vote(&r);
        assert_eq!(action, Action::Sell);
        assert!(score > 0.9);
    }

    #[test]
    fn ties_prefer_hold() {
        // Sideways + neutral + calm + neutral sentiment: everything holds.
        let r = report(TrendDirection::Sideways, MomentumState::Neutral, false, 0);
        let (action, score, _) = vote(&r);
        assert_eq!(action, Action::Hold);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn confidence_formula_clamps() {
        let mut metadata = ModelMetadata {
            name: "m".into(),
            version: 1,
            kind: ModelKind::Tree,
            feature_names: vec![],
            target_name: "next_close_return".into(),
            trained_at: chrono::Utc::now(),
            metrics: vec![("rmse".into(), 0.01), ("r2".into(), 0.5)],
            weight: 0.25,
        };
        let c = model_confidence(&metadata);
        assert!((c - 0.98).abs() < 1e-6);

        metadata.metrics = vec![("rmse".into(), 10.0), ("r2".into(), 0.1)];
        assert_eq!(model_confidence(&metadata), 0.0);
    }

    #[test]
    fn empty_registry_yields_safe_hold() {
        let matrix = FeatureEngine::new().compute(&bars(210), None).unwrap();
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();

        let decision = DecisionEngine::new().decide(&matrix, &registry);
        assert_eq!(decision.action, Action::Hold);
        assert!((decision.confidence - 0.5).abs() < 1e-12);
        assert_eq!(decision.reasoning, vec!["no models available".to_string()]);
        assert_eq!(decision.regime, Regime::Sideways);
    }

    #[test]
    fn trained_registry_produces_bounded_decision() {
        let matrix = FeatureEngine::new().compute(&bars(260), None).unwrap();
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        EnsembleTrainer::new(TrainerConfig {
            search_trials: 1,
            ..TrainerConfig::default()
        })
        .train(&matrix, &registry)
        .unwrap();

        let decision = DecisionEngine::new().decide(&matrix, &registry);
        assert_eq!(decision.symbol, "BTC");
        assert!((0.0..=1.0).contains(&decision.confidence));
        assert!((0.0..=1.0).contains(&decision.composite_score));
        assert!(decision
            .reasoning
            .iter()
            .any(|s| s.contains("ensemble")));
    }

    #[test]
    fn batch_rank_is_ordered() {
        let matrix = FeatureEngine::new().compute(&bars(210), None).unwrap();
        let rank = batch_rank(&matrix, "close");
        assert!((0.0..=1.0).contains(&rank));
        assert_eq!(batch_rank(&matrix, "nonexistent"), 0.5);
    }
}
