//! Dataset-size-aware hyperparameter policy
//!
//! Smaller datasets get shallower trees, heavier regularization and more
//! aggressive subsampling.

use crate::models::DatasetTier;
use serde::{Deserialize, Serialize};

/// Gradient boosting configuration for one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Maximum tree depth
    pub max_depth: usize,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample_bytree: f64,
    /// Minimum hessian sum in a child
    pub min_child_weight: f64,
    /// Shrinkage applied to every leaf weight
    pub learning_rate: f64,
    /// Number of boosting rounds
    pub n_estimators: usize,
}

impl Hyperparameters {
    pub fn for_sample_count(n: usize) -> Self {
        Self::for_tier(DatasetTier::for_sample_count(n))
    }

    pub fn for_tier(tier: DatasetTier) -> Self {
        match tier {
            DatasetTier::Small => Self {
                max_depth: 3,
                reg_alpha: 1.0,
                reg_lambda: 5.0,
                subsample: 0.7,
                colsample_bytree: 0.7,
                min_child_weight: 5.0,
                learning_rate: 0.1,
                n_estimators: 100,
            },
            DatasetTier::Medium => Self {
                max_depth: 4,
                reg_alpha: 0.5,
                reg_lambda: 2.0,
                subsample: 0.8,
                colsample_bytree: 0.8,
                min_child_weight: 3.0,
                learning_rate: 0.1,
                n_estimators: 150,
            },
            DatasetTier::Large => Self {
                max_depth: 5,
                reg_alpha: 0.1,
                reg_lambda: 1.0,
                subsample: 0.85,
                colsample_bytree: 0.9,
                min_child_weight: 1.0,
                learning_rate: 0.1,
                n_estimators: 200,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(DatasetTier::for_sample_count(1), DatasetTier::Small);
        assert_eq!(DatasetTier::for_sample_count(999), DatasetTier::Small);
        assert_eq!(DatasetTier::for_sample_count(1000), DatasetTier::Medium);
        assert_eq!(DatasetTier::for_sample_count(2999), DatasetTier::Medium);
        assert_eq!(DatasetTier::for_sample_count(3000), DatasetTier::Large);
        assert_eq!(DatasetTier::for_sample_count(100_000), DatasetTier::Large);
    }

    #[test]
    fn test_boundary_neighbours_get_different_configs() {
        assert_ne!(
            Hyperparameters::for_sample_count(999),
            Hyperparameters::for_sample_count(1000)
        );
        assert_ne!(
            Hyperparameters::for_sample_count(2999),
            Hyperparameters::for_sample_count(3000)
        );
    }

    #[test]
    fn test_tier_depths_and_subsampling() {
        let small = Hyperparameters::for_sample_count(500);
        let medium = Hyperparameters::for_sample_count(2000);
        let large = Hyperparameters::for_sample_count(5000);

        assert_eq!((small.max_depth, small.subsample), (3, 0.7));
        assert_eq!((medium.max_depth, medium.subsample), (4, 0.8));
        assert_eq!(large.max_depth, 5);
        assert!((0.8..=0.9).contains(&large.subsample));
    }

    #[test]
    fn test_smaller_tiers_are_more_conservative() {
        let tiers = [
            Hyperparameters::for_tier(DatasetTier::Small),
            Hyperparameters::for_tier(DatasetTier::Medium),
            Hyperparameters::for_tier(DatasetTier::Large),
        ];
        for pair in tiers.windows(2) {
            let (tighter, looser) = (&pair[0], &pair[1]);
            assert!(tighter.max_depth < looser.max_depth);
            assert!(tighter.reg_alpha > looser.reg_alpha);
            assert!(tighter.reg_lambda > looser.reg_lambda);
            assert!(tighter.min_child_weight > looser.min_child_weight);
            assert!(tighter.subsample <= looser.subsample);
        }
    }

    #[test]
    fn test_policy_is_deterministic() {
        assert_eq!(
            Hyperparameters::for_sample_count(1234),
            Hyperparameters::for_sample_count(1234)
        );
    }
}
