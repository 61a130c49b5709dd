//! Error taxonomy for model loading and request scoring

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Public body for requests that arrive while no model could be loaded
pub const MODEL_UNAVAILABLE_MESSAGE: &str = "Model is not loaded. Check server logs for details.";
/// Public body for requests without a `file` part
pub const NO_FILE_MESSAGE: &str = "No file uploaded.";
/// Public body for every unexpected failure; details stay in the server log
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An error occurred processing your request. Check logs for details.";

/// Failure to build an object store client from configuration
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("STORAGE_CONNECTION_STRING is not set")]
    NotConfigured,
    #[error("connection string segment `{0}` is not a key=value pair")]
    InvalidSegment(String),
    #[error("connection string is missing `{0}`")]
    MissingField(&'static str),
    #[error("object store client could not be built: {0}")]
    Build(#[from] object_store::Error),
}

/// Failure to parse or evaluate a serialized model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model text is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("tree {tree}: {message}")]
    InvalidTree { tree: usize, message: String },
    #[error("unsupported model: {0}")]
    Unsupported(String),
    #[error("model expects {expected} features per row, got {actual}")]
    FeatureWidth { expected: usize, actual: usize },
    #[error("model returned {actual} scores for {expected} rows")]
    RowCount { expected: usize, actual: usize },
    #[error("model format `{0}` support is not compiled in")]
    FormatUnavailable(&'static str),
    #[error("model output could not be interpreted: {0}")]
    Output(String),
    #[cfg(feature = "onnx")]
    #[error("onnx runtime: {0}")]
    Onnx(#[from] ort::Error),
}

/// Failure while fetching and installing the model artifacts.
///
/// Never shown to HTTP callers; they only observe the model as unavailable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("storage is not usable: {0}")]
    Storage(#[from] StoreError),
    #[error("failed to fetch `{object}` from container `{container}`: {source}")]
    Fetch {
        object: String,
        container: String,
        #[source]
        source: object_store::Error,
    },
    #[error("metadata object `{object}` is not valid JSON with a `features` list: {source}")]
    Metadata {
        object: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("metadata object `{object}` lists no features")]
    EmptyFeatures { object: String },
    #[error("model object `{object}` could not be loaded: {source}")]
    Model {
        object: String,
        #[source]
        source: ModelError,
    },
    #[error("model reads {model} features but metadata lists {metadata}")]
    FeatureCountMismatch { model: usize, metadata: usize },
}

/// Failure of a single `/predict` request
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("model is not loaded")]
    ModelUnavailable,
    #[error("no file uploaded")]
    NoFile,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("multipart upload could not be read: {0}")]
    Upload(String),
    #[error("uploaded file is empty")]
    EmptyCsv,
    #[error("malformed CSV: {0}")]
    MalformedCsv(#[from] csv::Error),
    #[error("CSV line {line} has {found} fields but the header has {expected}")]
    ExtraFields {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("feature `{column}` is not numeric in row {row}: {value:?}")]
    NonNumericFeature {
        column: String,
        row: usize,
        value: String,
    },
    #[error("inference failed: {0}")]
    Inference(#[from] ModelError),
    #[error("scoring task failed: {0}")]
    Task(String),
}

impl PredictError {
    /// HTTP status surfaced to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            PredictError::NoFile | PredictError::MissingColumns(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body surfaced to the caller
    pub fn public_message(&self) -> String {
        match self {
            PredictError::ModelUnavailable => MODEL_UNAVAILABLE_MESSAGE.to_string(),
            PredictError::NoFile => NO_FILE_MESSAGE.to_string(),
            PredictError::MissingColumns(missing) => {
                format!("Missing required columns: {}", missing.join(", "))
            }
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        (self.status_code(), self.public_message()).into_response()
    }
}
