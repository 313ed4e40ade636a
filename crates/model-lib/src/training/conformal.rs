//! Cross-validated conformal intervals (CV+)
//!
//! The calibration partition is split into k folds. One model is fit per
//! fold on the remaining folds, and the out-of-fold absolute residuals are
//! kept. For a new point x and miscoverage `alpha`:
//!
//! ```text
//! lower = floor(alpha (n+1))-th smallest of  mu_{-k(i)}(x) - R_i
//! upper = ceil((1-alpha)(n+1))-th smallest of mu_{-k(i)}(x) + R_i
//! ```
//!
//! (Barber et al., "Predictive inference with the jackknife+", 2021.)
//! Coverage holds for exchangeable data without distributional assumptions.

use super::booster::GradientBoostedTrees;
use super::policy::Hyperparameters;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Default number of cross-validation folds
pub const DEFAULT_FOLDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct OutOfFoldResidual {
    fold: usize,
    residual: f64,
}

/// Calibrated interval predictor fitted on the calibration partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformalCalibrator {
    fold_models: Vec<GradientBoostedTrees>,
    residuals: Vec<OutOfFoldResidual>,
}

impl ConformalCalibrator {
    /// Fit fold models and collect out-of-fold residuals.
    ///
    /// Returns `None` when there are fewer rows than folds.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &Hyperparameters,
        folds: usize,
        rng: &mut StdRng,
    ) -> Option<Self> {
        let n = y.len();
        if folds < 2 || n < folds {
            return None;
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let assignment: Vec<(usize, usize)> = order
            .iter()
            .enumerate()
            .map(|(pos, &row)| (row, pos % folds))
            .collect();

        let mut fold_models = Vec::with_capacity(folds);
        let mut residuals = Vec::with_capacity(n);

        for fold in 0..folds {
            let (held_out, fit_rows): (Vec<_>, Vec<_>) =
                assignment.iter().partition(|(_, f)| *f == fold);

            let fit_x: Vec<Vec<f64>> = fit_rows.iter().map(|(row, _)| x[*row].clone()).collect();
            let fit_y: Vec<f64> = fit_rows.iter().map(|(row, _)| y[*row]).collect();
            let model = GradientBoostedTrees::fit(&fit_x, &fit_y, params, rng);

            residuals.extend(held_out.iter().map(|(row, _)| OutOfFoldResidual {
                fold,
                residual: (y[*row] - model.predict(&x[*row])).abs(),
            }));
            fold_models.push(model);
        }

        Some(Self {
            fold_models,
            residuals,
        })
    }

    /// Interval for one feature row at the given confidence level (0, 1)
    pub fn interval(&self, row: &[f64], confidence: f64) -> (f64, f64) {
        let alpha = 1.0 - confidence;
        let fold_predictions: Vec<f64> = self.fold_models.iter().map(|m| m.predict(row)).collect();

        let mut lows: Vec<f64> = self
            .residuals
            .iter()
            .map(|r| fold_predictions[r.fold] - r.residual)
            .collect();
        let mut highs: Vec<f64> = self
            .residuals
            .iter()
            .map(|r| fold_predictions[r.fold] + r.residual)
            .collect();
        lows.sort_by(f64::total_cmp);
        highs.sort_by(f64::total_cmp);

        let n = self.residuals.len();
        let lower_rank = (alpha * (n as f64 + 1.0)).floor() as usize;
        let upper_rank = ((1.0 - alpha) * (n as f64 + 1.0)).ceil() as usize;

        (lows[rank_index(lower_rank, n)], highs[rank_index(upper_rank, n)])
    }

    pub fn calibration_size(&self) -> usize {
        self.residuals.len()
    }

    pub fn folds(&self) -> usize {
        self.fold_models.len()
    }
}

/// 1-based rank clamped into the valid index range
fn rank_index(rank: usize, n: usize) -> usize {
    rank.clamp(1, n) - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn noisy_line(n: usize, rng: &mut StdRng) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n).map(|_| vec![rng.gen_range(0.0..10.0)]).collect();
        let y = x
            .iter()
            .map(|r| 3.0 * r[0] + rng.gen_range(-1.0..1.0))
            .collect();
        (x, y)
    }

    #[test]
    fn test_fit_requires_enough_rows() {
        let params = Hyperparameters::for_sample_count(3);
        let mut rng = StdRng::seed_from_u64(1);
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![1.0, 2.0, 3.0];
        assert!(ConformalCalibrator::fit(&x, &y, &params, 5, &mut rng).is_none());
    }

    #[test]
    fn test_every_row_gets_one_out_of_fold_residual() {
        let mut rng = StdRng::seed_from_u64(2);
        let (x, y) = noisy_line(103, &mut rng);
        let params = Hyperparameters::for_sample_count(103);
        let calibrator = ConformalCalibrator::fit(&x, &y, &params, 5, &mut rng).unwrap();

        assert_eq!(calibrator.calibration_size(), 103);
        assert_eq!(calibrator.folds(), 5);
        assert!(calibrator.residuals.iter().all(|r| r.residual >= 0.0));
    }

    #[test]
    fn test_interval_widens_with_confidence() {
        let mut rng = StdRng::seed_from_u64(3);
        let (x, y) = noisy_line(300, &mut rng);
        let params = Hyperparameters::for_sample_count(300);
        let calibrator = ConformalCalibrator::fit(&x, &y, &params, 5, &mut rng).unwrap();

        let (lo80, hi80) = calibrator.interval(&[5.0], 0.80);
        let (lo95, hi95) = calibrator.interval(&[5.0], 0.95);
        assert!(lo80 <= hi80);
        assert!(hi95 - lo95 >= hi80 - lo80);
        // True value is 15 with noise in [-1, 1]
        assert!(lo95 < 15.0 && 15.0 < hi95);
    }

    #[test]
    fn test_rank_index_clamps() {
        assert_eq!(rank_index(0, 10), 0);
        assert_eq!(rank_index(1, 10), 0);
        assert_eq!(rank_index(10, 10), 9);
        assert_eq!(rank_index(11, 10), 9);
    }
}
