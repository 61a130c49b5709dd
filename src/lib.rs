//! Fraud Scoring Service Library
//!
//! Batch fraud scoring over HTTP: uploaded transaction CSVs are scored by a
//! tree-ensemble model fetched lazily from object storage.

pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod scoring;
pub mod server;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{LoadError, ModelError, PredictError, StoreError};
pub use feature_extractor::FeatureExtractor;
pub use models::{LoadedModel, ModelCache, ModelLoader};
pub use server::{router, AppState};
pub use store::ArtifactStore;
pub use types::{ScoreResponse, TransactionTable};
