//! Batch normalisation and principal-component projection.
//!
//! The engine z-scores the feature matrix on the current batch and appends
//! the first three principal components. Components are extracted by power
//! iteration with deflation on the covariance matrix, which is deterministic
//! for a fixed input (the start vector is fixed, not random).

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 200;
const CONVERGENCE_TOL: f64 = 1e-12;

/// A fitted projection: per-column mean/std plus component vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaProjection {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// Row-major component vectors, one per component.
    pub components: Vec<Vec<f64>>,
}

impl PcaProjection {
    /// Fit mean/std and `n_components` principal components on `matrix`
    /// (rows = observations, columns = features).
    pub fn fit(matrix: &Array2<f64>, n_components: usize) -> Self {
        let (rows, cols) = matrix.dim();
        let mut mean = vec![0.0; cols];
        let mut std = vec![1.0; cols];
        for (j, col) in matrix.axis_iter(Axis(1)).enumerate() {
            let m = col.sum() / rows as f64;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / rows as f64;
            mean[j] = m;
            std[j] = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
        }

        let scaled = Self::scale_with(matrix, &mean, &std);

        // Covariance of the scaled matrix.
        let mut cov = scaled.t().dot(&scaled) / rows.max(1) as f64;

        let k = n_components.min(cols);
        let mut components = Vec::with_capacity(k);
        for _ in 0..k {
            let v = dominant_eigenvector(&cov);
            let lambda = v.dot(&cov.dot(&v));
            // Deflate.
            let outer = outer_product(&v, &v);
            cov = cov - lambda * &outer;
            components.push(v.to_vec());
        }

        Self { mean, std, components }
    }

    fn scale_with(matrix: &Array2<f64>, mean: &[f64], std: &[f64]) -> Array2<f64> {
        let mut scaled = matrix.clone();
        for (j, mut col) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| (v - mean[j]) / std[j]);
        }
        scaled
    }

    /// Project a matrix onto the fitted components. Rows map to one value
    /// per component.
    pub fn project(&self, matrix: &Array2<f64>) -> Array2<f64> {
        let scaled = Self::scale_with(matrix, &self.mean, &self.std);
        let k = self.components.len();
        let mut out = Array2::zeros((matrix.nrows(), k));
        for (c, comp) in self.components.iter().enumerate() {
            let comp = Array1::from_vec(comp.clone());
            let proj = scaled.dot(&comp);
            out.column_mut(c).assign(&proj);
        }
        out
    }
}

fn dominant_eigenvector(m: &Array2<f64>) -> Array1<f64> {
    let n = m.nrows();
    // Fixed deterministic start vector.
    let mut v = Array1::from_elem(n, 1.0 / (n as f64).sqrt());
    for _ in 0..POWER_ITERATIONS {
        let next = m.dot(&v);
        let norm = next.dot(&next).sqrt();
        if norm < 1e-15 {
            return v;
        }
        let next = next / norm;
        let delta: f64 = (&next - &v).iter().map(|d| d.abs()).sum();
        v = next;
        if delta < CONVERGENCE_TOL {
            break;
        }
    }
    v
}

fn outer_product(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let n = a.len();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] = a[i] * b[j];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_component_follows_dominant_direction() {
        // Strongly correlated columns: the first component loads both.
        let m = array![
            [1.0, 2.0],
            [2.0, 4.1],
            [3.0, 5.9],
            [4.0, 8.2],
            [5.0, 9.8],
        ];
        let pca = PcaProjection::fit(&m, 2);
        let c = &pca.components[0];
        assert!(c[0].abs() > 0.5 && c[1].abs() > 0.5);
        assert_eq!(c[0].signum(), c[1].signum());
    }

    #[test]
    fn fit_is_deterministic() {
        let m = array![[1.0, 0.3, 2.0], [0.5, 1.1, 0.2], [2.2, 0.9, 1.4], [1.7, 2.0, 0.6]];
        let a = PcaProjection::fit(&m, 3);
        let b = PcaProjection::fit(&m, 3);
        assert_eq!(a.components, b.components);
        let pa = a.project(&m);
        let pb = b.project(&m);
        assert_eq!(pa, pb);
    }

    #[test]
    fn projection_with_frozen_parameters() {
        let m = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.5]];
        let pca = PcaProjection::fit(&m, 1);
        let other = array![[2.0, 3.0]];
        let out = pca.project(&other);
        assert_eq!(out.dim(), (1, 1));
        assert!(out[[0, 0]].is_finite());
    }
}
