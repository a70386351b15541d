//! Technical indicator implementations.
//!
//! Every function maps full input slices to an output Vec of the same
//! length. Warm-up rows where the window is not yet filled are NaN; the
//! engine fills them at its trailing normalisation step. Divisions guard
//! zero denominators with `EPS`.

/// Replacement denominator for guarded divisions.
pub const EPS: f64 = 1e-9;

fn guarded(denom: f64) -> f64 {
    if denom.abs() < EPS {
        EPS
    } else {
        denom
    }
}

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; values.len()];
    if values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first window.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; values.len()];
    if values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    for i in period..values.len() {
        out[i] = (values[i] - out[i - 1]) * k + out[i - 1];
    }
    out
}

/// Rolling standard deviation (population).
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; values.len()];
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = var.sqrt();
    }
    out
}

/// Relative strength index (Wilder smoothing).
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; close.len()];
    if close.len() <= period {
        return out;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = close[i] - close[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = 100.0 - 100.0 / (1.0 + avg_gain / guarded(avg_loss));
    for i in (period + 1)..close.len() {
        let delta = close[i] - close[i - 1];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = 100.0 - 100.0 / (1.0 + avg_gain / guarded(avg_loss));
    }
    out
}

/// Stochastic oscillator %K and %D (k_period / k_smooth / d_period).
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    k_smooth: usize,
    d_period: usize,
) -> (Vec<f64>, Vec<f64>) {
    let k_period = k_period.max(1);
    let n = close.len();
    let mut raw_k = vec![f64::NAN; n];
    for i in (k_period - 1)..n {
        let hh = high[i + 1 - k_period..=i]
            .iter()
            .fold(f64::MIN, |a, &b| a.max(b));
        let ll = low[i + 1 - k_period..=i]
            .iter()
            .fold(f64::MAX, |a, &b| a.min(b));
        raw_k[i] = 100.0 * (close[i] - ll) / guarded(hh - ll);
    }
    let k = nan_sma(&raw_k, k_smooth);
    let d = nan_sma(&k, d_period);
    (k, d)
}

/// Williams %R.
pub fn williams_r(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    for i in (period - 1)..n {
        let hh = high[i + 1 - period..=i]
            .iter()
            .fold(f64::MIN, |a, &b| a.max(b));
        let ll = low[i + 1 - period..=i]
            .iter()
            .fold(f64::MAX, |a, &b| a.min(b));
        out[i] = -100.0 * (hh - close[i]) / guarded(hh - ll);
    }
    out
}

/// Ultimate oscillator over three horizons (classically 7/14/28).
pub fn ultimate_oscillator(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    p1: usize,
    p2: usize,
    p3: usize,
) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 {
        return out;
    }
    let mut bp = vec![0.0; n];
    let mut tr = vec![0.0; n];
    for i in 1..n {
        let true_low = low[i].min(close[i - 1]);
        let true_high = high[i].max(close[i - 1]);
        bp[i] = close[i] - true_low;
        tr[i] = true_high - true_low;
    }
    let longest = p1.max(p2).max(p3).max(1);
    for i in longest..n {
        let avg = |p: usize| {
            let p = p.max(1);
            let bp_sum: f64 = bp[i + 1 - p..=i].iter().sum();
            let tr_sum: f64 = tr[i + 1 - p..=i].iter().sum();
            bp_sum / guarded(tr_sum)
        };
        out[i] = 100.0 * (4.0 * avg(p1) + 2.0 * avg(p2) + avg(p3)) / 7.0;
    }
    out
}

/// MACD line, signal line, and histogram.
pub fn macd(
    close: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal = nan_ema(&line, signal_period);
    let hist: Vec<f64> = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    (line, signal, hist)
}

/// Ichimoku tenkan / kijun / senkou-a / senkou-b (9/26/52 midpoints,
/// clamped by the engine when history is short). Senkou lines are not
/// displaced; the row value is the cloud level computed at that row.
pub fn ichimoku(
    high: &[f64],
    low: &[f64],
    tenkan_p: usize,
    kijun_p: usize,
    senkou_b_p: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let midpoint = |p: usize| -> Vec<f64> {
        let p = p.max(1);
        let n = high.len();
        let mut out = vec![f64::NAN; n];
        for i in (p - 1)..n {
            let hh = high[i + 1 - p..=i].iter().fold(f64::MIN, |a, &b| a.max(b));
            let ll = low[i + 1 - p..=i].iter().fold(f64::MAX, |a, &b| a.min(b));
            out[i] = (hh + ll) / 2.0;
        }
        out
    };
    let tenkan = midpoint(tenkan_p);
    let kijun = midpoint(kijun_p);
    let senkou_a: Vec<f64> = tenkan
        .iter()
        .zip(&kijun)
        .map(|(t, k)| (t + k) / 2.0)
        .collect();
    let senkou_b = midpoint(senkou_b_p);
    (tenkan, kijun, senkou_a, senkou_b)
}

/// True range series; first element is high-low.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if n == 0 {
        return out;
    }
    out[0] = high[0] - low[0];
    for i in 1..n {
        out[i] = (high[i] - low[i])
            .max((high[i] - close[i - 1]).abs())
            .max((low[i] - close[i - 1]).abs());
    }
    out
}

/// Average true range (SMA of true range).
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    nan_sma(&true_range(high, low, close), period)
}

/// Bollinger bands: (upper, middle, lower, width).
pub fn bollinger(close: &[f64], period: usize, k: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma(close, period);
    let sd = rolling_std(close, period);
    let upper: Vec<f64> = middle.iter().zip(&sd).map(|(m, s)| m + k * s).collect();
    let lower: Vec<f64> = middle.iter().zip(&sd).map(|(m, s)| m - k * s).collect();
    let width: Vec<f64> = upper
        .iter()
        .zip(&lower)
        .zip(&middle)
        .map(|((u, l), m)| (u - l) / guarded(*m))
        .collect();
    (upper, middle, lower, width)
}

/// Keltner channels: EMA-20 middle, ± mean range × 2.
pub fn keltner(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = ema(close, period);
    let range: Vec<f64> = high.iter().zip(low).map(|(h, l)| h - l).collect();
    let avg_range = sma(&range, period);
    let upper: Vec<f64> = middle
        .iter()
        .zip(&avg_range)
        .map(|(m, r)| m + mult * r)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(&avg_range)
        .map(|(m, r)| m - mult * r)
        .collect();
    (upper, middle, lower)
}

/// Money flow index.
pub fn mfi(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 {
        return out;
    }
    let typical: Vec<f64> = (0..n).map(|i| (high[i] + low[i] + close[i]) / 3.0).collect();
    let mut pos_flow = vec![0.0; n];
    let mut neg_flow = vec![0.0; n];
    for i in 1..n {
        let flow = typical[i] * volume[i];
        if typical[i] > typical[i - 1] {
            pos_flow[i] = flow;
        } else if typical[i] < typical[i - 1] {
            neg_flow[i] = flow;
        }
    }
    for i in period..n {
        let pos: f64 = pos_flow[i + 1 - period..=i].iter().sum();
        let neg: f64 = neg_flow[i + 1 - period..=i].iter().sum();
        out[i] = 100.0 - 100.0 / (1.0 + pos / guarded(neg));
    }
    out
}

/// On-balance volume.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![0.0; n];
    for i in 1..n {
        out[i] = out[i - 1]
            + if close[i] > close[i - 1] {
                volume[i]
            } else if close[i] < close[i - 1] {
                -volume[i]
            } else {
                0.0
            };
    }
    out
}

/// Chaikin oscillator: EMA(fast) − EMA(slow) of the accumulation/
/// distribution line.
pub fn chaikin(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
    fast: usize,
    slow: usize,
) -> Vec<f64> {
    let n = close.len();
    let mut adl = vec![0.0; n];
    for i in 0..n {
        let mfm = ((close[i] - low[i]) - (high[i] - close[i])) / guarded(high[i] - low[i]);
        let prev = if i == 0 { 0.0 } else { adl[i - 1] };
        adl[i] = prev + mfm * volume[i];
    }
    let fast_ema = ema(&adl, fast);
    let slow_ema = ema(&adl, slow);
    fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect()
}

/// Cumulative volume-weighted average price.
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    let mut pv = 0.0;
    let mut v = 0.0;
    for i in 0..n {
        let typical = (high[i] + low[i] + close[i]) / 3.0;
        pv += typical * volume[i];
        v += volume[i];
        out[i] = pv / guarded(v);
    }
    out
}

// ── NaN-aware rolling helpers ─────────────────────────────────────────
// Rolling means over series that carry NaN warm-up prefixes: the output is
// NaN until the window holds only finite values.

fn nan_sma(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; values.len()];
    for i in (period.saturating_sub(1))..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            out[i] = window.iter().sum::<f64>() / period as f64;
        }
    }
    out
}

fn nan_ema(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![f64::NAN; values.len()];
    let Some(first) = values.iter().position(|v| v.is_finite()) else {
        return out;
    };
    if values.len() < first + period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[first..first + period].iter().sum::<f64>() / period as f64;
    let start = first + period - 1;
    out[start] = seed;
    for i in (start + 1)..values.len() {
        out[i] = (values[i] - out[i - 1]) * k + out[i - 1];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_matches_hand_computation() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&v, 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn ema_seeds_with_sma() {
        let v = [2.0, 4.0, 6.0, 8.0];
        let out = ema(&v, 2);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 3.0);
        // k = 2/3: 3 + (6-3)*2/3 = 5
        assert!((out[2] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let v: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&v, 14);
        let last = out.last().unwrap();
        assert!(*last > 99.0, "monotonic rise should pin RSI near 100, got {last}");
    }

    #[test]
    fn stochastic_bounded() {
        let high: Vec<f64> = (0..40).map(|i| 101.0 + (i as f64 * 0.7).sin()).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 2.0).collect();
        let close: Vec<f64> = high.iter().map(|h| h - 1.0).collect();
        let (k, d) = stochastic(&high, &low, &close, 14, 3, 3);
        for v in k.iter().chain(d.iter()).filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let close = [10.0, 11.0, 10.5, 10.5, 12.0];
        let volume = [100.0, 200.0, 50.0, 30.0, 70.0];
        let out = obv(&close, &volume);
        assert_eq!(out, vec![0.0, 200.0, 150.0, 150.0, 220.0]);
    }

    #[test]
    fn guarded_division_never_produces_nan() {
        // Flat series drives every range denominator to zero.
        let flat = [50.0; 40];
        let (k, _) = stochastic(&flat, &flat, &flat, 14, 3, 3);
        assert!(k.iter().skip(20).all(|v| v.is_finite()));
        let wr = williams_r(&flat, &flat, &flat, 14);
        assert!(wr.iter().skip(20).all(|v| v.is_finite()));
    }
}
