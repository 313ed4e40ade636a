//! Gradient-boosted regression trees
//!
//! Second-order boosting on squared error (hessian is 1 per row), with
//! L1/L2-regularized leaf weights, row and column subsampling per tree,
//! a minimum child weight and a depth limit.

use super::policy::Hyperparameters;
use crate::models::MISSING_FEATURE_VALUE;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Minimum loss reduction for a split to be kept
const MIN_SPLIT_GAIN: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(MISSING_FEATURE_VALUE);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Fitted boosting ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit on a dense row-major matrix.
    ///
    /// `x` and `y` must have the same length and at least one row.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &Hyperparameters, rng: &mut StdRng) -> Self {
        debug_assert_eq!(x.len(), y.len());
        let n_features = x.first().map_or(0, Vec::len);
        let base_score = mean(y);
        let mut predictions = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let gradients: Vec<f64> = predictions.iter().zip(y).map(|(p, t)| p - t).collect();
            let rows = sample_rows(y.len(), params.subsample, rng);
            let features = sample_features(n_features, params.colsample_bytree, rng);

            let builder = TreeBuilder {
                x,
                gradients: &gradients,
                features: &features,
                params,
            };
            let tree = builder.build(rows);

            for (pred, row) in predictions.iter_mut().zip(x) {
                *pred += tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            base_score,
            n_features,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    gradients: &'a [f64],
    features: &'a [usize],
    params: &'a Hyperparameters,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>) -> RegressionTree {
        let mut nodes = Vec::new();
        self.grow(&mut nodes, rows, 0);
        RegressionTree { nodes }
    }

    fn grow(&self, nodes: &mut Vec<Node>, rows: Vec<usize>, depth: usize) -> usize {
        let g_sum: f64 = rows.iter().map(|&i| self.gradients[i]).sum();
        let h_sum = rows.len() as f64;
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: self.leaf_weight(g_sum, h_sum),
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }

        let Some(split) = self.best_split(&rows, g_sum, h_sum) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);

        let left = self.grow(nodes, left_rows, depth + 1);
        let right = self.grow(nodes, right_rows, depth + 1);
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g_sum: f64, h_sum: f64) -> Option<SplitCandidate> {
        let parent_score = self.score(g_sum, h_sum);
        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            let mut sorted: Vec<(f64, f64)> = rows
                .iter()
                .map(|&i| (self.x[i][feature], self.gradients[i]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for k in 0..sorted.len() - 1 {
                g_left += sorted[k].1;
                h_left += 1.0;

                let (here, next) = (sorted[k].0, sorted[k + 1].0);
                if here == next {
                    continue;
                }
                let h_right = h_sum - h_left;
                if h_left < min_child || h_right < min_child {
                    continue;
                }

                let gain = self.score(g_left, h_left) + self.score(g_sum - g_left, h_right)
                    - parent_score;
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let g = soft_threshold(g, self.params.reg_alpha);
        g * g / (h + self.params.reg_lambda)
    }

    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.reg_alpha) / (h + self.params.reg_lambda)
            * self.params.learning_rate
    }
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn sample_rows(n: usize, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let rows: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < fraction).collect();
    if rows.is_empty() {
        (0..n).collect()
    } else {
        rows
    }
}

fn sample_features(n_features: usize, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    let mut features: Vec<usize> = (0..n_features).collect();
    if n_features == 0 || fraction >= 1.0 {
        return features;
    }
    let keep = ((n_features as f64 * fraction).ceil() as usize).clamp(1, n_features);
    features.shuffle(rng);
    features.truncate(keep);
    features.sort_unstable();
    features
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute error between paired predictions and targets
pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

/// Root mean squared error between paired predictions and targets
pub fn root_mean_squared_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    let mse = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / predicted.len() as f64;
    mse.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn linear_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i % 50) as f64, ((i * 7) % 30) as f64])
            .collect();
        let y = x.iter().map(|r| 2.0 * r[0] - 0.5 * r[1] + 10.0).collect();
        (x, y)
    }

    #[test]
    fn test_fit_reduces_error_below_mean_baseline() {
        let (x, y) = linear_data(400);
        let params = Hyperparameters::for_sample_count(400);
        let mut rng = StdRng::seed_from_u64(7);
        let model = GradientBoostedTrees::fit(&x, &y, &params, &mut rng);

        let predictions: Vec<f64> = x.iter().map(|r| model.predict(r)).collect();
        let baseline = vec![mean(&y); y.len()];

        let model_mae = mean_absolute_error(&predictions, &y);
        let baseline_mae = mean_absolute_error(&baseline, &y);
        assert!(
            model_mae < baseline_mae * 0.3,
            "model MAE {} not much better than baseline {}",
            model_mae,
            baseline_mae
        );
        assert_eq!(model.n_trees(), params.n_estimators);
        assert_eq!(model.n_features(), 2);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let (x, y) = linear_data(200);
        let params = Hyperparameters::for_sample_count(200);
        let a = GradientBoostedTrees::fit(&x, &y, &params, &mut StdRng::seed_from_u64(1));
        let b = GradientBoostedTrees::fit(&x, &y, &params, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_target_predicts_constant() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![5.0; 20];
        let params = Hyperparameters::for_sample_count(20);
        let model = GradientBoostedTrees::fit(&x, &y, &params, &mut StdRng::seed_from_u64(3));
        assert!((model.predict(&[3.0]) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_error_metrics() {
        let predicted = [1.0, 2.0, 3.0];
        let actual = [2.0, 2.0, 5.0];
        assert!((mean_absolute_error(&predicted, &actual) - 1.0).abs() < 1e-12);
        assert!((root_mean_squared_error(&predicted, &actual) - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }
}
