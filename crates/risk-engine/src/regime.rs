//! Market regime classification from a close series.

use common::Regime;

/// Rolling momentum over rolling stddev on the close series; bull above
/// the threshold, bear below its negation, sideways in between. Too few
/// closes reads unknown.
pub fn classify(closes: &[f64], window: usize, threshold: f64) -> Regime {
    let window = window.max(2);
    if closes.len() < window + 1 {
        return Regime::Unknown;
    }
    let tail = &closes[closes.len() - window - 1..];
    let returns: Vec<f64> = tail
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0].abs().max(1e-12))
        .collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = var.sqrt();
    if std < 1e-12 {
        return Regime::Sideways;
    }
    let ratio = mean / std;
    if ratio > threshold {
        Regime::Bull
    } else if ratio < -threshold {
        Regime::Bear
    } else {
        Regime::Sideways
    }
}

/// Multiplier applied to risk scores per regime.
pub fn factor(regime: Regime) -> f64 {
    match regime {
        Regime::Bull => 0.8,
        Regime::Bear => 1.2,
        Regime::Sideways | Regime::Unknown => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_climb_is_bull() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        assert_eq!(classify(&closes, 20, 0.1), Regime::Bull);
    }

    #[test]
    fn steady_decline_is_bear() {
        let closes: Vec<f64> = (0..40).map(|i| 150.0 - i as f64).collect();
        assert_eq!(classify(&closes, 20, 0.1), Regime::Bear);
    }

    #[test]
    fn choppy_series_is_sideways() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        assert_eq!(classify(&closes, 20, 0.5), Regime::Sideways);
    }

    #[test]
    fn short_series_is_unknown() {
        assert_eq!(classify(&[100.0, 101.0], 20, 0.1), Regime::Unknown);
    }
}
