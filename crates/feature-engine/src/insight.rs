//! Rule-based market insights extracted from the last feature row.
//!
//! Pure function of the matrix tail; consumed by the decision engine's
//! strategy voting.

use serde::Serialize;

use crate::engine::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumState {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendInsight {
    pub direction: TrendDirection,
    /// 0.8 when the SMA stack is monotonic, otherwise 0.5; +0.2 when MACD
    /// confirms.
    pub strength: f64,
    pub macd_confirms: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MomentumInsight {
    pub state: MomentumState,
    pub strength: f64,
    pub rsi_14: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolatilityInsight {
    /// Short-window stddev above the long window.
    pub high: bool,
    /// Close outside the 20-period Bollinger band.
    pub band_expanding: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentInsight {
    /// Volume above its SMA-20.
    pub volume_increasing: bool,
    /// +1 positive (MFI < 20), -1 negative (MFI > 80), 0 neutral.
    pub mfi_signal: i8,
}

/// Snapshot of every rule family for one symbol at the batch tail.
#[derive(Debug, Clone, Serialize)]
pub struct InsightReport {
    pub trend: TrendInsight,
    pub momentum: MomentumInsight,
    pub volatility: VolatilityInsight,
    pub sentiment: SentimentInsight,
}

/// Extract insights from the last row of a feature matrix.
pub fn extract(matrix: &FeatureMatrix) -> InsightReport {
    let v = |name: &str| matrix.last(name).unwrap_or(0.0);

    // Trend: SMA stack ordering. Monotonic stacks are strong signals.
    let stack = [v("sma_10"), v("sma_20"), v("sma_50"), v("sma_100"), v("sma_200")];
    let ascending = stack.windows(2).all(|w| w[0] >= w[1]);
    let descending = stack.windows(2).all(|w| w[0] <= w[1]);
    let close = v("close");
    let direction = if ascending && close > stack[0] {
        TrendDirection::Bullish
    } else if descending && close < stack[0] {
        TrendDirection::Bearish
    } else if stack[0] > stack[2] {
        TrendDirection::Bullish
    } else if stack[0] < stack[2] {
        TrendDirection::Bearish
    } else {
        TrendDirection::Sideways
    };
    let monotonic = ascending || descending;
    let macd_confirms = match direction {
        TrendDirection::Bullish => v("macd_12_26") > v("macd_signal_12_26"),
        TrendDirection::Bearish => v("macd_12_26") < v("macd_signal_12_26"),
        TrendDirection::Sideways => false,
    };
    let mut strength: f64 = if monotonic { 0.8 } else { 0.5 };
    if macd_confirms {
        strength = (strength + 0.2).min(1.0);
    }
    let trend = TrendInsight {
        direction,
        strength,
        macd_confirms,
    };

    // Momentum: RSI-14 plus the stochastic pair.
    let rsi_14 = v("rsi_14");
    let stoch_k = v("stoch_k");
    let stoch_d = v("stoch_d");
    let overbought = rsi_14 > 70.0 || (stoch_k > 80.0 && stoch_d > 80.0);
    let oversold = rsi_14 < 30.0 || (stoch_k < 20.0 && stoch_d < 20.0);
    let (state, strength) = if overbought {
        (MomentumState::Overbought, 0.8)
    } else if oversold {
        (MomentumState::Oversold, 0.8)
    } else {
        (MomentumState::Neutral, 0.5)
    };
    let momentum = MomentumInsight {
        state,
        strength,
        rsi_14,
    };

    let volatility = VolatilityInsight {
        high: v("std_20") > v("std_50"),
        band_expanding: close > v("bb_upper_20") || close < v("bb_lower_20"),
    };

    let mfi = v("mfi_14");
    let sentiment = SentimentInsight {
        volume_increasing: v("volume") > v("volume_sma_20"),
        mfi_signal: if mfi > 80.0 {
            -1
        } else if mfi < 20.0 {
            1
        } else {
            0
        },
    };

    InsightReport {
        trend,
        momentum,
        volatility,
        sentiment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FeatureEngine;
    use common::Bar;

    fn bars_with_trend(n: usize, slope: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64 * slope;
                Bar {
                    exchange: "binance".into(),
                    symbol: "BTC".into(),
                    interval: "1h".into(),
                    ts_ms: i as i64 * 3_600_000,
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    #[test]
    fn rising_market_reads_bullish_and_overbought() {
        let m = FeatureEngine::new()
            .compute(&bars_with_trend(250, 0.5), None)
            .unwrap();
        let report = extract(&m);
        assert_eq!(report.trend.direction, TrendDirection::Bullish);
        assert!(report.trend.strength >= 0.8);
        assert_eq!(report.momentum.state, MomentumState::Overbought);
    }

    #[test]
    fn falling_market_reads_bearish_and_oversold() {
        let m = FeatureEngine::new()
            .compute(&bars_with_trend(250, -0.3), None)
            .unwrap();
        let report = extract(&m);
        assert_eq!(report.trend.direction, TrendDirection::Bearish);
        assert_eq!(report.momentum.state, MomentumState::Oversold);
    }
}
