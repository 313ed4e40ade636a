//! HTTP API: predictions, outcomes, model health, Prometheus metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use model_lib::{
    health::{ComponentStatus, HealthRegistry},
    FeatureMap, LogError, ModelLifecycle, ModelVersion, OutcomeObserved, PointPrediction,
    PredictError, PredictionId, PredictionResult, RetrainError, StoreError, TrainingError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ModelLifecycle>,
    pub health_registry: HealthRegistry,
    pub default_confidence: f64,
    /// Queue feeding the outcome consumer
    pub outcome_events: mpsc::Sender<OutcomeObserved>,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<ModelLifecycle>,
        health_registry: HealthRegistry,
        default_confidence: f64,
        outcome_events: mpsc::Sender<OutcomeObserved>,
    ) -> Self {
        Self {
            lifecycle,
            health_registry,
            default_confidence,
            outcome_events,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub features: FeatureMap,
    /// Ask for a calibrated interval (default true)
    #[serde(default = "default_true")]
    pub interval: bool,
    pub confidence: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Interval(PredictionResult),
    Point(PointPrediction),
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub prediction_id: PredictionId,
    pub actual_value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub subject: String,
    pub versions: Vec<ModelVersion>,
    pub latest: Option<ModelVersion>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueuedResponse {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error returned by a handler, rendered as `{"error": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        let status = match &err {
            PredictError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            PredictError::InvalidConfidence(_) => StatusCode::BAD_REQUEST,
            PredictError::Store(_) | PredictError::Log(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        let status = match &err {
            LogError::AlreadyCompleted { .. } | LogError::DuplicatePrediction { .. } => StatusCode::CONFLICT,
            LogError::UnknownPrediction { .. } => StatusCode::NOT_FOUND,
            LogError::SubjectMismatch { .. } | LogError::InvalidActual { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LogError::Persist { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<RetrainError> for ApiError {
    fn from(err: RetrainError) -> Self {
        let status = match &err {
            RetrainError::InProgress { .. } => StatusCode::CONFLICT,
            RetrainError::Training(TrainingError::InsufficientData { .. } | TrainingError::NoFeatures { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RetrainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.health_registry.refresh(&state.lifecycle).await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {}", e))
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Run lifecycle work that reads or writes files on the blocking pool
async fn blocking<T, E, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("request task failed: {}", e)))?
        .map_err(Into::into)
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    let response = if request.interval {
        let confidence = request.confidence.unwrap_or(state.default_confidence);
        PredictionResponse::Interval(
            blocking(move || lifecycle.predict_interval(&subject, &request.features, confidence)).await?,
        )
    } else {
        PredictionResponse::Point(blocking(move || lifecycle.predict_point(&subject, &request.features)).await?)
    };
    Ok(Json(response))
}

async fn report_outcome(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
    Json(request): Json<OutcomeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let lifecycle = state.lifecycle.clone();
    let outcome = OutcomeObserved {
        subject,
        prediction_id: request.prediction_id,
        actual_value: request.actual_value,
    };
    let report = blocking(move || lifecycle.report_outcome(&outcome)).await?;
    Ok(Json(report))
}

/// Post-commit notifications from the shot store, processed asynchronously
async fn enqueue_outcomes(
    State(state): State<Arc<AppState>>,
    Json(events): Json<Vec<OutcomeObserved>>,
) -> impl IntoResponse {
    let mut accepted = 0;
    let mut rejected = 0;
    for event in events {
        match state.outcome_events.try_send(event) {
            Ok(()) => accepted += 1,
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "Outcome queue rejected notification");
            }
        }
    }

    // Partial acceptance is still 202, with the rejected count in the body
    (StatusCode::ACCEPTED, Json(EnqueuedResponse { accepted, rejected }))
}

async fn subject_health(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lifecycle = state.lifecycle.clone();
    Ok(Json(blocking(move || lifecycle.health(&subject)).await?))
}

async fn versions(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<Json<VersionsResponse>, ApiError> {
    let lifecycle = state.lifecycle.clone();
    let lookup = subject.clone();
    let versions = blocking(move || lifecycle.versions(&lookup)).await?;
    Ok(Json(VersionsResponse {
        latest: versions.last().copied(),
        subject,
        versions,
    }))
}

async fn train(
    State(state): State<Arc<AppState>>,
    Path(subject): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    info!(subject = %subject, "On-demand training requested");
    let metadata = state.lifecycle.train_now(&subject).await?;
    Ok((StatusCode::CREATED, Json(metadata)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/subjects/:subject/predictions", post(predict))
        .route("/v1/subjects/:subject/outcomes", post(report_outcome))
        .route("/v1/subjects/:subject/health", get(subject_health))
        .route("/v1/subjects/:subject/versions", get(versions))
        .route("/v1/subjects/:subject/train", post(train))
        .route("/v1/outcome-events", post(enqueue_outcomes))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
