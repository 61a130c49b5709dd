//! HTTP surface: `/predict`, `/health` and `/model/reload`

use crate::error::{PredictError, MODEL_UNAVAILABLE_MESSAGE};
use crate::metrics::{MetricsSnapshot, RequestOutcome, ScoringMetrics};
use crate::models::ModelCache;
use crate::scoring::score_upload_blocking;
use crate::types::ScoredTable;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Multipart part carrying the CSV upload
pub const FILE_FIELD: &str = "file";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ModelCache>,
    pub metrics: Arc<ScoringMetrics>,
}

impl AppState {
    pub fn new(cache: Arc<ModelCache>, metrics: Arc<ScoringMetrics>) -> Self {
        Self { cache, metrics }
    }
}

/// Build the service router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/predict", post(predict))
        .route("/api/predict", post(predict))
        .route("/health", get(health))
        .route("/model/reload", post(reload_model))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("predict", %request_id);

    async move {
        let started = Instant::now();
        let result = run_predict(&state, multipart).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match result {
            Ok(scored) => {
                state.metrics.record_scores(scored.probabilities());
                state.metrics.record_request(RequestOutcome::Success, elapsed);
                info!(rows = scored.len(), elapsed_ms, "Prediction complete");
                Json(scored.into_response()).into_response()
            }
            Err(e) => {
                let outcome = match e {
                    PredictError::ModelUnavailable => RequestOutcome::ModelUnavailable,
                    ref e if e.is_client_error() => RequestOutcome::BadRequest,
                    _ => RequestOutcome::Failed,
                };
                state.metrics.record_request(outcome, elapsed);

                if e.is_client_error() {
                    warn!(error = %e, elapsed_ms, "Rejected prediction request");
                } else {
                    error!(error = %e, elapsed_ms, "Prediction request failed");
                }
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Ensure a model, read the upload, score it.
///
/// The model check comes first: with no model even a request without a file
/// is answered as model-unavailable.
async fn run_predict(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ScoredTable, PredictError> {
    let model = state
        .cache
        .get_or_load()
        .await
        .ok_or(PredictError::ModelUnavailable)?;

    let csv = read_file_field(multipart).await?;
    info!(bytes = csv.len(), "Received upload");

    score_upload_blocking(model, csv).await
}

async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, PredictError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(error = %rejection, "Request body is not multipart");
            return Err(PredictError::NoFile);
        }
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?
    {
        if field.name() == Some(FILE_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| PredictError::Upload(e.to_string()));
        }
    }

    Err(PredictError::NoFile)
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_format: Option<&'static str>,
    pub feature_count: Option<usize>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub load_attempts: u64,
    pub load_failures: u64,
    pub metrics: MetricsSnapshot,
}

/// Report model state without triggering a load
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_report(&state))
}

/// Fetch both artifacts again and swap them in.
///
/// A failed reload leaves the service unloaded; the next request retries.
async fn reload_model(State(state): State<AppState>) -> Response {
    match state.cache.reload().await {
        Ok(model) => {
            info!(
                features = model.features().len(),
                format = model.format.as_str(),
                "Model reloaded"
            );
            Json(health_report(&state)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Model reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, MODEL_UNAVAILABLE_MESSAGE).into_response()
        }
    }
}

fn health_report(state: &AppState) -> HealthResponse {
    let model = state.cache.current();

    HealthResponse {
        status: if model.is_some() { "ready" } else { "unloaded" },
        model_loaded: model.is_some(),
        model_format: model.as_ref().map(|m| m.format.as_str()),
        feature_count: model.as_ref().map(|m| m.features().len()),
        loaded_at: model.as_ref().map(|m| m.loaded_at),
        load_attempts: state.cache.load_attempts(),
        load_failures: state.cache.load_failures(),
        metrics: state.metrics.snapshot(),
    }
}
