//! Shared fixtures for unit and scenario tests

use crate::capability::MlCapabilities;
use crate::models::{Dataset, FeatureMap, LabeledRow};
use crate::training::{ModelTrainer, TrainOptions, TrainedModel, TrainerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Standard normal sample (Box-Muller)
pub fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub fn features(club_speed: f64, launch_angle: f64) -> FeatureMap {
    [
        ("club_speed".to_string(), club_speed),
        ("launch_angle".to_string(), launch_angle),
    ]
    .into_iter()
    .collect()
}

/// carry = 1.8 * club_speed + 2.0 * launch_angle + N(0, 2^2)
pub fn synthetic_dataset(subject: &str, n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..n)
        .map(|_| {
            let speed = rng.gen_range(70.0..110.0);
            let launch = rng.gen_range(8.0..20.0);
            let carry = 1.8 * speed + 2.0 * launch + 2.0 * gaussian(&mut rng);
            LabeledRow::new(features(speed, launch), carry)
        })
        .collect();
    Dataset::new(subject, rows)
}

pub fn train(subject: &str, n: usize) -> TrainedModel {
    ModelTrainer::new(TrainerConfig::default(), MlCapabilities::full())
        .train(&synthetic_dataset(subject, n, 11), &TrainOptions::calibrated(None))
        .expect("training fixture")
}
