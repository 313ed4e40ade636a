//! Drift-triggered retraining

mod orchestrator;
mod state;

pub use orchestrator::{
    OrchestratorConfig, RetrainOrchestrator, DEFAULT_COOLDOWN, DEFAULT_DRIFT_THRESHOLD,
    DEFAULT_TRAINING_TIMEOUT,
};
pub use state::{DriftDisposition, RetrainState, RetrainTriggerState, StateStore};
