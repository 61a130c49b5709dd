//! End-to-end tests for the scoring endpoint
//!
//! The router runs against an in-memory object store seeded with a small
//! two-feature LightGBM model (`amount`, `hour`).

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use fraud_scoring_service::config::ModelFormat;
use fraud_scoring_service::error::{INTERNAL_ERROR_MESSAGE, MODEL_UNAVAILABLE_MESSAGE, NO_FILE_MESSAGE};
use fraud_scoring_service::{router, AppState, ArtifactStore, ModelCache, ModelLoader};
use fraud_scoring_service::metrics::ScoringMetrics;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const MODEL: &str = include_str!("fixtures/two_feature_model.txt");
const META: &str = include_str!("fixtures/model_meta.json");
const BOUNDARY: &str = "scoring-test-boundary";

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

async fn put(memory: &InMemory, name: &str, body: &str) {
    memory
        .put(&Path::from(name), PutPayload::from(Bytes::from(body.to_string())))
        .await
        .unwrap();
}

async fn seeded_store() -> Arc<InMemory> {
    let memory = Arc::new(InMemory::new());
    put(&memory, "model_meta.json", META).await;
    put(&memory, "model.txt", MODEL).await;
    memory
}

fn state_over(store: ArtifactStore) -> AppState {
    let loader = ModelLoader::new(store, "model_meta.json", "model.txt", ModelFormat::Auto);
    AppState::new(
        Arc::new(ModelCache::new(loader)),
        Arc::new(ScoringMetrics::new()),
    )
}

fn app(state: AppState) -> Router {
    router(state, 1024 * 1024)
}

fn multipart_body(field: &str, content: &str) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"transactions.csv\"\r\nContent-Type: text/csv\r\n\r\n{content}\r\n--{b}--\r\n",
        b = BOUNDARY,
        field = field,
        content = content
    )
}

fn upload(uri: &str, field: &str, csv: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, csv)))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_predict_scores_every_row_in_order() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));

    let response = app(state)
        .oneshot(upload("/predict", "file", "amount,hour,id\n100,3,A1\n5,14,A2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["total_rows"], 2);
    let predictions = json["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 2);

    let first = predictions[0].as_object().unwrap();
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["amount", "hour", "id", "fraud_probability"]);
    assert_eq!(predictions[0]["id"], "A1");
    assert_eq!(predictions[1]["id"], "A2");

    let p0 = predictions[0]["fraud_probability"].as_f64().unwrap();
    let p1 = predictions[1]["fraud_probability"].as_f64().unwrap();
    assert!((p0 - sigmoid(-1.4)).abs() < 1e-9);
    assert!((p1 - sigmoid(-0.15)).abs() < 1e-9);
}

#[tokio::test]
async fn test_api_route_alias() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));

    let response = app(state)
        .oneshot(upload("/api/predict", "file", "amount,hour\n1000,2\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let p = json["predictions"][0]["fraud_probability"].as_f64().unwrap();
    assert!((p - sigmoid(0.85)).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_columns_are_listed() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));

    let response = app(state)
        .oneshot(upload("/predict", "file", "id,merchant\nA1,7\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_text(response).await,
        "Missing required columns: amount, hour"
    );
}

#[tokio::test]
async fn test_request_without_file_part() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));
    let app = app(state);

    let response = app
        .clone()
        .oneshot(upload("/predict", "attachment", "amount,hour\n1,2\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, NO_FILE_MESSAGE);

    // Not multipart at all
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header(header::CONTENT_TYPE, "text/csv")
                .body(Body::from("amount,hour\n1,2\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, NO_FILE_MESSAGE);
}

#[tokio::test]
async fn test_unreachable_store_reports_model_unavailable() {
    let state = state_over(ArtifactStore::from_connection_string(None, "models"));
    let app = app(state.clone());

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(upload("/predict", "file", "amount,hour\n100,3\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, MODEL_UNAVAILABLE_MESSAGE);
    }

    // Every request retries the load
    assert_eq!(state.cache.load_attempts(), 3);
    assert_eq!(state.cache.load_failures(), 3);
    assert_eq!(state.metrics.snapshot().rows_scored, 0);
}

#[tokio::test]
async fn test_model_check_precedes_file_check() {
    let state = state_over(ArtifactStore::from_client(Arc::new(InMemory::new()), "models"));

    let response = app(state)
        .oneshot(upload("/predict", "attachment", "amount,hour\n1,2\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, MODEL_UNAVAILABLE_MESSAGE);
}

#[tokio::test]
async fn test_store_recovers_after_failed_load() {
    let memory = Arc::new(InMemory::new());
    put(&memory, "model_meta.json", META).await;
    let state = state_over(ArtifactStore::from_client(memory.clone(), "models"));
    let app = app(state.clone());

    let response = app
        .clone()
        .oneshot(upload("/predict", "file", "amount,hour\n100,3\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    put(&memory, "model.txt", MODEL).await;
    let response = app
        .oneshot(upload("/predict", "file", "amount,hour\n100,3\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.cache.load_attempts(), 2);
}

#[tokio::test]
async fn test_short_row_is_scored_with_missing_cells() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));

    let response = app(state)
        .oneshot(upload("/predict", "file", "amount,hour,id\n100,3,A1\n5,14\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_rows"], 2);
    let second = json["predictions"][1].as_object().unwrap();
    assert_eq!(second.len(), 4);
    assert!(second["id"].is_null());
    let p = second["fraud_probability"].as_f64().unwrap();
    assert!((p - sigmoid(-0.15)).abs() < 1e-9);
}

#[tokio::test]
async fn test_malformed_csv_is_opaque_500() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));
    let app = app(state);

    let response = app
        .clone()
        .oneshot(upload("/predict", "file", "amount,hour\n1,2\n3,4,5\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, INTERNAL_ERROR_MESSAGE);

    let response = app
        .oneshot(upload("/predict", "file", "amount,hour\nlots,2\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, INTERNAL_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_model_is_fetched_once_and_scores_are_stable() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));
    let app = app(state.clone());
    let csv = "amount,hour,id\n1000,2,C\n100,3,A\n5,14,B\n";

    let first = body_json(
        app.clone()
            .oneshot(upload("/predict", "file", csv))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(app.oneshot(upload("/predict", "file", csv)).await.unwrap()).await;

    assert_eq!(first, second);
    let ids: Vec<&str> = first["predictions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["C", "A", "B"]);
    assert_eq!(state.cache.load_attempts(), 1);
}

#[tokio::test]
async fn test_existing_probability_column_is_overwritten() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));

    let response = app(state)
        .oneshot(upload(
            "/predict",
            "file",
            "amount,fraud_probability,hour\n100,0.99,3\n",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let row = json["predictions"][0].as_object().unwrap();
    assert_eq!(row.len(), 3);
    let p = row["fraud_probability"].as_f64().unwrap();
    assert!((p - sigmoid(-1.4)).abs() < 1e-9);
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let state = state_over(ArtifactStore::from_client(seeded_store().await, "models"));
    let app = app(state);

    let health = || {
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap()
    };

    let json = body_json(app.clone().oneshot(health()).await.unwrap()).await;
    assert_eq!(json["status"], "unloaded");
    assert_eq!(json["model_loaded"], false);
    assert_eq!(json["load_attempts"], 0);

    let response = app
        .clone()
        .oneshot(upload("/predict", "file", "amount,hour\n100,3\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(app.oneshot(health()).await.unwrap()).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["model_format"], "lightgbm");
    assert_eq!(json["feature_count"], 2);
    assert!(json["loaded_at"].is_string());
    assert_eq!(json["metrics"]["requests_succeeded"], 1);
    assert_eq!(json["metrics"]["rows_scored"], 1);
}

#[tokio::test]
async fn test_reload_swaps_in_new_artifacts() {
    let memory = seeded_store().await;
    let state = state_over(ArtifactStore::from_client(memory.clone(), "models"));
    let app = app(state.clone());
    let reload = || {
        Request::builder()
            .method("POST")
            .uri("/model/reload")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(reload()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["feature_count"], 2);
    let first = state.cache.current().unwrap();

    let response = app.clone().oneshot(reload()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!Arc::ptr_eq(&first, &state.cache.current().unwrap()));
    assert_eq!(state.cache.load_attempts(), 2);

    // A broken artifact unloads the model until the next successful load
    put(&memory, "model.txt", "not a model").await;
    let response = app.clone().oneshot(reload()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, MODEL_UNAVAILABLE_MESSAGE);
    assert!(state.cache.current().is_none());

    let response = app
        .oneshot(upload("/predict", "file", "amount,hour\n100,3\n"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
