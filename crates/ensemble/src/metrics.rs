//! Evaluation metrics for regressors and classifiers.

use ndarray::Array1;

/// rmse / mae / r2 for a regressor.
pub fn regression_metrics(pred: &Array1<f64>, actual: &Array1<f64>) -> Vec<(String, f64)> {
    let n = pred.len().max(1) as f64;
    let mse = pred
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / n;
    let mae = pred
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / n;
    let mean = actual.sum() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = pred
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (a - p).powi(2))
        .sum();
    let r2 = if ss_tot > 1e-12 { 1.0 - ss_res / ss_tot } else { 0.0 };
    vec![
        ("rmse".into(), mse.sqrt()),
        ("mae".into(), mae),
        ("r2".into(), r2),
    ]
}

pub fn mse(pred: &Array1<f64>, actual: &Array1<f64>) -> f64 {
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / n
}

/// accuracy / precision / recall / f1 for a binary classifier whose inputs
/// are 0/1 labels.
pub fn classification_metrics(pred: &Array1<f64>, actual: &Array1<f64>) -> Vec<(String, f64)> {
    let mut tp: f64 = 0.0;
    let mut fp = 0.0;
    let mut tn = 0.0;
    let mut fne = 0.0;
    for (p, a) in pred.iter().zip(actual.iter()) {
        let p = if *p >= 0.5 { 1.0 } else { 0.0 };
        match (p as i64, *a as i64) {
            (1, 1) => tp += 1.0,
            (1, 0) => fp += 1.0,
            (0, 0) => tn += 1.0,
            _ => fne += 1.0,
        }
    }
    let total = (tp + fp + tn + fne).max(1.0);
    let accuracy = (tp + tn) / total;
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fne > 0.0 { tp / (tp + fne) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    vec![
        ("accuracy".into(), accuracy),
        ("precision".into(), precision),
        ("recall".into(), recall),
        ("f1".into(), f1),
    ]
}
