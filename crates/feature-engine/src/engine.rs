//! Bars → feature matrix.
//!
//! Deterministic for a fixed bar sequence and engine version: same input,
//! same version, byte-identical output. Window parameters are clamped to the
//! available history (`max(1, min(n, default))`), so short sequences produce
//! a full matrix rather than an error.

use common::{Bar, Error, FeatureRow, Result, SymbolMeta};
use ndarray::Array2;

use crate::indicators as ind;
use crate::pca::PcaProjection;

/// Bumped whenever the feature-name set or any column formula changes.
pub const ENGINE_VERSION: u32 = 2;

/// Minimum bar window the default parameters assume.
pub const MIN_WINDOW: usize = 200;

const SMA_PERIODS: [usize; 5] = [10, 20, 50, 100, 200];
const RSI_PERIODS: [usize; 3] = [7, 14, 21];
const MACD_PARAMS: [(usize, usize, usize); 3] = [(12, 26, 9), (8, 21, 5), (10, 30, 7)];
const STD_PERIODS: [usize; 3] = [10, 20, 50];
const ATR_PERIODS: [usize; 3] = [10, 20, 50];
const BB_PERIODS: [usize; 2] = [20, 50];
const META_WINDOWS: [usize; 4] = [7, 14, 30, 90];

/// Dense feature matrix for one symbol batch.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub symbol: String,
    pub ts_ms: Vec<i64>,
    pub names: Vec<String>,
    /// rows × features, same row order as `ts_ms`.
    pub data: Array2<f64>,
}

impl FeatureMatrix {
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(self.data.column(idx).to_vec())
    }

    /// Value of `name` in the final row.
    pub fn last(&self, name: &str) -> Option<f64> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(self.data[[self.nrows() - 1, idx]])
    }

    pub fn rows(&self) -> Vec<FeatureRow> {
        (0..self.nrows())
            .map(|i| FeatureRow {
                symbol: self.symbol.clone(),
                ts_ms: self.ts_ms[i],
                features: self
                    .names
                    .iter()
                    .enumerate()
                    .map(|(j, n)| (n.clone(), self.data[[i, j]]))
                    .collect(),
            })
            .collect()
    }
}

/// Deterministic bars → features mapping, versioned via [`ENGINE_VERSION`].
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine;

impl FeatureEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the full feature matrix, fitting normalisation and PCA on the
    /// batch itself.
    pub fn compute(&self, bars: &[Bar], meta: Option<&SymbolMeta>) -> Result<FeatureMatrix> {
        if bars.is_empty() {
            return Err(Error::Data("empty bar window".into()));
        }
        let n = bars.len();
        let symbol = bars[0].symbol.clone();
        let ts_ms: Vec<i64> = bars.iter().map(|b| b.ts_ms).collect();

        let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        for (name, col) in [
            ("open", &open),
            ("high", &high),
            ("low", &low),
            ("close", &close),
            ("volume", &volume),
        ] {
            if col.iter().any(|v| !v.is_finite()) {
                return Err(Error::Config(format!(
                    "required OHLCV column '{}' is missing or non-numeric",
                    name
                )));
            }
        }

        // Clamp every window parameter to the available history.
        let clamp = |p: usize| -> usize { p.min(n).max(1) };

        let mut names: Vec<String> = Vec::new();
        let mut cols: Vec<Vec<f64>> = Vec::new();
        let mut push = |name: String, col: Vec<f64>| {
            debug_assert_eq!(col.len(), n);
            names.push(name);
            cols.push(col);
        };

        // Raw OHLCV copies.
        push("open".into(), open.clone());
        push("high".into(), high.clone());
        push("low".into(), low.clone());
        push("close".into(), close.clone());
        push("volume".into(), volume.clone());

        // Moving averages.
        for p in SMA_PERIODS {
            push(format!("sma_{p}"), ind::sma(&close, clamp(p)));
            push(format!("ema_{p}"), ind::ema(&close, clamp(p)));
        }

        // Momentum.
        for p in RSI_PERIODS {
            push(format!("rsi_{p}"), ind::rsi(&close, clamp(p)));
        }
        let (stoch_k, stoch_d) = ind::stochastic(&high, &low, &close, clamp(14), clamp(3), clamp(3));
        push("stoch_k".into(), stoch_k);
        push("stoch_d".into(), stoch_d);
        push(
            "williams_r".into(),
            ind::williams_r(&high, &low, &close, clamp(14)),
        );
        push(
            "ult_osc".into(),
            ind::ultimate_oscillator(&high, &low, &close, clamp(7), clamp(14), clamp(28)),
        );

        // Trend.
        for (fast, slow, sig) in MACD_PARAMS {
            let (line, signal, hist) = ind::macd(&close, clamp(fast), clamp(slow), clamp(sig));
            push(format!("macd_{fast}_{slow}"), line);
            push(format!("macd_signal_{fast}_{slow}"), signal);
            push(format!("macd_hist_{fast}_{slow}"), hist);
        }
        let (tenkan, kijun, senkou_a, senkou_b) =
            ind::ichimoku(&high, &low, clamp(9), clamp(26), clamp(52));
        push("ichimoku_tenkan".into(), tenkan);
        push("ichimoku_kijun".into(), kijun);
        push("ichimoku_senkou_a".into(), senkou_a);
        push("ichimoku_senkou_b".into(), senkou_b);

        // Volatility.
        for p in STD_PERIODS {
            push(format!("std_{p}"), ind::rolling_std(&close, clamp(p)));
        }
        for p in ATR_PERIODS {
            push(format!("atr_{p}"), ind::atr(&high, &low, &close, clamp(p)));
        }
        let mut bb_width_20 = Vec::new();
        for p in BB_PERIODS {
            let (u, m, l, w) = ind::bollinger(&close, clamp(p), 2.0);
            if p == 20 {
                bb_width_20 = w.clone();
            }
            push(format!("bb_upper_{p}"), u);
            push(format!("bb_middle_{p}"), m);
            push(format!("bb_lower_{p}"), l);
            push(format!("bb_width_{p}"), w);
        }
        let (kc_u, kc_m, kc_l) = ind::keltner(&high, &low, &close, clamp(20), 2.0);
        push("kc_upper".into(), kc_u);
        push("kc_middle".into(), kc_m);
        push("kc_lower".into(), kc_l);

        // Volume / sentiment.
        push("volume_sma_20".into(), ind::sma(&volume, clamp(20)));
        push(
            "mfi_14".into(),
            ind::mfi(&high, &low, &close, &volume, clamp(14)),
        );
        push("obv".into(), ind::obv(&close, &volume));
        push(
            "chaikin".into(),
            ind::chaikin(&high, &low, &close, &volume, clamp(3), clamp(10)),
        );
        push("vwap".into(), ind::vwap(&high, &low, &close, &volume));

        // Age / marketcap group, only when metadata is supplied.
        if let Some(meta) = meta {
            if let Some(age_days) = meta.age_days {
                push("age_log1p".into(), vec![(age_days).ln_1p(); n]);
                let widths = if bb_width_20.is_empty() {
                    vec![0.0; n]
                } else {
                    bb_width_20.clone()
                };
                push(
                    "age_adj_volatility".into(),
                    widths.iter().map(|w| w / (age_days + 1.0)).collect(),
                );
                push("lifecycle_bucket".into(), vec![lifecycle_bucket(age_days); n]);
            }
            if meta.marketcap.len() == n {
                let mcap = &meta.marketcap;
                push(
                    "mcap_log1p".into(),
                    mcap.iter().map(|m| m.max(0.0).ln_1p()).collect(),
                );
                for w in META_WINDOWS {
                    let w = clamp(w);
                    let momentum = pct_change(mcap, w);
                    let accel = diff(&momentum);
                    push(format!("mcap_momentum_{w}"), momentum.clone());
                    push(format!("mcap_accel_{w}"), accel);
                    push(format!("mcap_rank_{w}"), rolling_rank(mcap, w));
                }
            }
        }

        // Trailing normalisation step: forward-fill, backward-fill, then
        // zero-replace whatever is still non-finite.
        for col in cols.iter_mut() {
            fill_and_zero(col);
        }

        let flat: Vec<f64> = (0..n)
            .flat_map(|i| cols.iter().map(move |c| c[i]))
            .collect();
        let mut data = Array2::from_shape_vec((n, cols.len()), flat)
            .map_err(|e| Error::Data(format!("feature matrix shape error: {}", e)))?;

        // Append pc_1..pc_3 from a batch z-score + PCA.
        let proj = PcaProjection::fit(&data, 3);
        let pcs = proj.project(&data);
        let k = pcs.ncols();
        let mut with_pcs = Array2::zeros((n, cols.len() + k));
        with_pcs
            .slice_mut(ndarray::s![.., ..cols.len()])
            .assign(&data);
        with_pcs.slice_mut(ndarray::s![.., cols.len()..]).assign(&pcs);
        data = with_pcs;
        for c in 0..k {
            names.push(format!("pc_{}", c + 1));
        }

        // Final guard: declared columns carry no NaN/±∞.
        data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });

        Ok(FeatureMatrix {
            symbol,
            ts_ms,
            names,
            data,
        })
    }

}

fn lifecycle_bucket(age_days: f64) -> f64 {
    // Age quantile buckets: new / young / established / mature.
    if age_days < 30.0 {
        0.0
    } else if age_days < 90.0 {
        1.0
    } else if age_days < 365.0 {
        2.0
    } else {
        3.0
    }
}

fn pct_change(values: &[f64], lag: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in lag..values.len() {
        let base = values[i - lag];
        out[i] = (values[i] - base) / if base.abs() < ind::EPS { ind::EPS } else { base };
    }
    out
}

fn diff(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = values[i] - values[i - 1];
    }
    out
}

/// Percentile rank of the current value within the trailing window.
fn rolling_rank(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = vec![f64::NAN; values.len()];
    for i in (window - 1)..values.len() {
        let w = &values[i + 1 - window..=i];
        let below = w.iter().filter(|v| **v <= values[i]).count();
        out[i] = below as f64 / window as f64;
    }
    out
}

fn fill_and_zero(col: &mut [f64]) {
    let mut last_finite: Option<f64> = None;
    for v in col.iter_mut() {
        if v.is_finite() {
            last_finite = Some(*v);
        } else if let Some(f) = last_finite {
            *v = f;
        }
    }
    let mut next_finite: Option<f64> = None;
    for v in col.iter_mut().rev() {
        if v.is_finite() {
            next_finite = Some(*v);
        } else if let Some(f) = next_finite {
            *v = f;
        }
    }
    for v in col.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + (t * 0.31).sin() * 5.0 + t * 0.05;
                Bar {
                    exchange: "binance".into(),
                    symbol: "BTC".into(),
                    interval: "1h".into(),
                    ts_ms: 1_700_000_000_000 + i as i64 * 3_600_000,
                    open: close - 0.2,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 50.0 + (t * 0.7).cos().abs() * 20.0,
                }
            })
            .collect()
    }

    #[test]
    fn output_has_no_nan_or_inf() {
        let engine = FeatureEngine::new();
        let m = engine.compute(&make_bars(250), None).unwrap();
        assert!(m.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn short_history_is_clamped_not_an_error() {
        let engine = FeatureEngine::new();
        let m = engine.compute(&make_bars(30), None).unwrap();
        assert_eq!(m.nrows(), 30);
        assert!(m.data.iter().all(|v| v.is_finite()));
        // Window-200 columns are still present.
        assert!(m.column("sma_200").is_some());
    }

    #[test]
    fn deterministic_for_same_input() {
        let engine = FeatureEngine::new();
        let bars = make_bars(120);
        let a = engine.compute(&bars, None).unwrap();
        let b = engine.compute(&bars, None).unwrap();
        assert_eq!(a.names, b.names);
        for (x, y) in a.data.iter().zip(b.data.iter()) {
            assert!((x - y).abs() <= 1e-9);
        }
    }

    #[test]
    fn non_numeric_column_is_config_error() {
        let engine = FeatureEngine::new();
        let mut bars = make_bars(50);
        bars[10].volume = f64::NAN;
        match engine.compute(&bars, None) {
            Err(Error::Config(msg)) => assert!(msg.contains("volume")),
            other => panic!("expected ConfigError, got {:?}", other.map(|m| m.names.len())),
        }
    }

    #[test]
    fn rows_mirror_the_matrix() {
        let engine = FeatureEngine::new();
        let m = engine.compute(&make_bars(60), None).unwrap();
        let rows = m.rows();
        assert_eq!(rows.len(), m.nrows());
        assert_eq!(rows[5].symbol, "BTC");
        assert_eq!(rows[5].ts_ms, m.ts_ms[5]);
        let j = m.names.iter().position(|n| n == "close").unwrap();
        assert_eq!(rows[5].get("close"), Some(m.data[[5, j]]));
    }

    #[test]
    fn pca_columns_appended() {
        let engine = FeatureEngine::new();
        let m = engine.compute(&make_bars(100), None).unwrap();
        assert!(m.names.ends_with(&["pc_1".into(), "pc_2".into(), "pc_3".into()]));
    }

    #[test]
    fn meta_columns_present_when_meta_supplied() {
        let engine = FeatureEngine::new();
        let bars = make_bars(100);
        let meta = SymbolMeta {
            age_days: Some(45.0),
            marketcap: bars.iter().map(|b| b.close * 1e6).collect(),
        };
        let m = engine.compute(&bars, Some(&meta)).unwrap();
        assert!(m.column("age_log1p").is_some());
        assert!(m.column("lifecycle_bucket").is_some());
        assert_eq!(m.last("lifecycle_bucket"), Some(1.0));
        assert!(m.column("mcap_momentum_7").is_some());
    }
}
