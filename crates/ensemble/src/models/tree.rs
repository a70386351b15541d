//! Regression tree shared by the forest, extra-trees, and boosting models.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Split selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Splitter {
    /// Exhaustive best split over candidate thresholds.
    Best,
    /// One random threshold per candidate feature (extra-trees).
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per split; None means all.
    pub max_features: Option<usize>,
    pub splitter: Splitter,
    pub seed: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
            splitter: Splitter::Best,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    config: TreeConfig,
    root: Node,
}

impl RegressionTree {
    /// Fit on the rows selected by `indices`.
    pub fn fit_indices(x: &Array2<f64>, y: &Array1<f64>, indices: &[usize], config: TreeConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let root = grow(x, y, indices, &config, 0, &mut rng);
        Self { config, root }
    }

    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, config: TreeConfig) -> Self {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        Self::fit_indices(x, y, &indices, config)
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::from_iter((0..x.nrows()).map(|i| self.predict_row(&x.row(i).to_vec())))
    }
}

fn mean_of(y: &Array1<f64>, indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(y: &Array1<f64>, indices: &[usize]) -> f64 {
    let mean = mean_of(y, indices);
    indices.iter().map(|&i| (y[i] - mean).powi(2)).sum()
}

fn grow(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    config: &TreeConfig,
    depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= config.max_depth
        || indices.len() < config.min_samples_split
        || indices.len() < 2 * config.min_samples_leaf
    {
        return Node::Leaf {
            value: mean_of(y, indices),
        };
    }

    let n_features = x.ncols();
    let k = config.max_features.unwrap_or(n_features).min(n_features).max(1);
    let mut candidate_features: Vec<usize> = (0..n_features).collect();
    if k < n_features {
        candidate_features.shuffle(rng);
        candidate_features.truncate(k);
    }

    let parent_sse = sse_of(y, indices);
    let mut best: Option<(usize, f64, f64, Vec<usize>, Vec<usize>)> = None;

    for &feature in &candidate_features {
        let mut values: Vec<f64> = indices.iter().map(|&i| x[[i, feature]]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        if values.len() < 2 {
            continue;
        }

        let thresholds: Vec<f64> = match config.splitter {
            Splitter::Best => values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect(),
            Splitter::Random => {
                let lo = values[0];
                let hi = *values.last().unwrap();
                vec![rng.gen_range(lo..hi)]
            }
        };

        for threshold in thresholds {
            let (mut left, mut right) = (Vec::new(), Vec::new());
            for &i in indices {
                if x[[i, feature]] <= threshold {
                    left.push(i);
                } else {
                    right.push(i);
                }
            }
            if left.len() < config.min_samples_leaf || right.len() < config.min_samples_leaf {
                continue;
            }
            let gain = parent_sse - sse_of(y, &left) - sse_of(y, &right);
            if best.as_ref().map_or(true, |b| gain > b.2) {
                best = Some((feature, threshold, gain, left, right));
            }
        }
    }

    match best {
        Some((feature, threshold, gain, left, right)) if gain > 1e-12 => Node::Split {
            feature,
            threshold,
            left: Box::new(grow(x, y, &left, config, depth + 1, rng)),
            right: Box::new(grow(x, y, &right, config, depth + 1, rng)),
        },
        _ => Node::Leaf {
            value: mean_of(y, indices),
        },
    }
}
