//! Health checks for the model service
//!
//! Tracks the store, the prediction log and the retrain orchestrator for
//! liveness and readiness probes.

use crate::lifecycle::ModelLifecycle;
use crate::retrain::RetrainOrchestrator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, but something needs attention
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst component status wins
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const MODEL_STORE: &str = "model_store";
    pub const PREDICTION_LOG: &str = "prediction_log";
    pub const ORCHESTRATOR: &str = "orchestrator";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Orchestrator is degraded while any subject is cooling down after a failed retrain
    pub async fn observe_orchestrator(&self, orchestrator: &RetrainOrchestrator) {
        let mut cooling = orchestrator.subjects_in_cooldown();
        if cooling.is_empty() {
            self.set_healthy(components::ORCHESTRATOR).await;
        } else {
            cooling.sort();
            self.set_degraded(
                components::ORCHESTRATOR,
                format!("retraining in cooldown for: {}", cooling.join(", ")),
            )
            .await;
        }
    }

    /// Re-check the model store and the orchestrator
    pub async fn refresh(&self, lifecycle: &ModelLifecycle) {
        let root = lifecycle.store().root();
        if root.is_dir() {
            self.set_healthy(components::MODEL_STORE).await;
        } else {
            self.set_unhealthy(
                components::MODEL_STORE,
                format!("model directory {} is missing", root.display()),
            )
            .await;
        }

        // PREDICTION_LOG is set by the maintenance loop from pruning results
        self.observe_orchestrator(lifecycle.orchestrator()).await;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Service not yet initialized".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MlCapabilities;
    use crate::drift::{DriftDetector, DriftEvent, DriftSeverity};
    use crate::models::ModelVersion;
    use crate::prediction_log::PredictionLogger;
    use crate::retrain::{OrchestratorConfig, StateStore};
    use crate::store::ModelStore;
    use crate::training::{InMemoryDataSource, ModelTrainer, TrainerConfig};
    use chrono::Utc;
    use tempfile::TempDir;

    fn lifecycle(dir: &TempDir) -> ModelLifecycle {
        let store = ModelStore::open(dir.path().join("models")).unwrap();
        let orchestrator = RetrainOrchestrator::new(
            OrchestratorConfig {
                drift_threshold: 1,
                ..OrchestratorConfig::default()
            },
            Arc::new(ModelTrainer::new(TrainerConfig::default(), MlCapabilities::full())),
            store.clone(),
            Arc::new(InMemoryDataSource::new()),
            StateStore::in_memory(),
        )
        .unwrap();
        ModelLifecycle::new(
            store,
            Arc::new(PredictionLogger::in_memory()),
            MlCapabilities::full(),
            DriftDetector::default(),
            orchestrator,
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_and_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::MODEL_STORE).await;
        registry.register(components::PREDICTION_LOG).await;

        registry.set_degraded(components::PREDICTION_LOG, "journal slow").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::MODEL_STORE, "disk gone").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.register(components::MODEL_STORE).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::MODEL_STORE, "Failed").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_refresh_keeps_prediction_log_status() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        let registry = HealthRegistry::new();
        registry.register(components::PREDICTION_LOG).await;
        registry
            .set_degraded(components::PREDICTION_LOG, "pruning failed: disk full")
            .await;

        registry.refresh(&lifecycle).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::PREDICTION_LOG].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_cooldown_degrades_orchestrator() {
        let dir = TempDir::new().unwrap();
        let lifecycle = lifecycle(&dir);
        let registry = HealthRegistry::new();

        registry.refresh(&lifecycle).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        // Empty source: the triggered cycle fails and the subject cools down
        lifecycle.orchestrator().on_drift_event(&DriftEvent {
            subject: "Wedge".to_string(),
            detected_at: Utc::now(),
            window_mae: 9.0,
            baseline_mae: 3.0,
            window_size: 20,
            threshold: 4.5,
            severity: DriftSeverity::Critical,
            model_version: ModelVersion::new(1),
        });
        lifecycle.orchestrator().wait_idle().await;

        registry.refresh(&lifecycle).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        let orchestrator = &health.components[components::ORCHESTRATOR];
        assert!(orchestrator.message.as_deref().unwrap().contains("Wedge"));
        assert!(registry.readiness().await.reason.is_some());
    }
}
