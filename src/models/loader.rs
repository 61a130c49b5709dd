//! Model artifact loader

use crate::config::{ModelFormat, StorageConfig};
use crate::error::{LoadError, ModelError};
use crate::models::lightgbm::LightGbmModel;
use crate::models::{LoadedModel, ModelMetadata, Scorer};
use crate::store::ArtifactStore;
use tracing::info;

/// Fetches the metadata and model objects and turns them into a [`LoadedModel`]
pub struct ModelLoader {
    store: ArtifactStore,
    meta_file: String,
    model_file: String,
    format: ModelFormat,
}

impl ModelLoader {
    /// Create a loader from storage configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            ArtifactStore::from_connection_string(
                config.connection_string.clone(),
                &config.container,
            ),
            &config.meta_file,
            &config.model_file,
            config.model_format,
        )
    }

    pub fn new(store: ArtifactStore, meta_file: &str, model_file: &str, format: ModelFormat) -> Self {
        Self {
            store,
            meta_file: meta_file.to_string(),
            model_file: model_file.to_string(),
            format,
        }
    }

    pub fn container(&self) -> &str {
        self.store.container()
    }

    /// Fetch and parse both artifacts. Either both succeed or the whole load fails.
    pub async fn load(&self) -> Result<LoadedModel, LoadError> {
        info!(
            container = %self.store.container(),
            meta_file = %self.meta_file,
            model_file = %self.model_file,
            "Loading model and metadata from object store"
        );

        let client = self.store.open()?;

        let meta_bytes = self.store.fetch(client.as_ref(), &self.meta_file).await?;
        let metadata: ModelMetadata =
            serde_json::from_slice(&meta_bytes).map_err(|source| LoadError::Metadata {
                object: self.meta_file.clone(),
                source,
            })?;
        if metadata.features.is_empty() {
            return Err(LoadError::EmptyFeatures {
                object: self.meta_file.clone(),
            });
        }
        info!(
            object = %self.meta_file,
            features = metadata.features.len(),
            "Loaded model metadata"
        );

        let model_bytes = self.store.fetch(client.as_ref(), &self.model_file).await?;
        let format = self.format.resolve(&self.model_file);
        let scorer = build_scorer(format, &model_bytes).map_err(|source| LoadError::Model {
            object: self.model_file.clone(),
            source,
        })?;

        let model = LoadedModel::new(scorer, metadata, format)?;
        info!(
            object = %self.model_file,
            format = format.as_str(),
            size = model_bytes.len(),
            "Loaded model"
        );
        Ok(model)
    }
}

fn build_scorer(format: ModelFormat, bytes: &[u8]) -> Result<Box<dyn Scorer>, ModelError> {
    match format {
        ModelFormat::Onnx => build_onnx(bytes),
        ModelFormat::LightGbm | ModelFormat::Auto => {
            Ok(Box::new(LightGbmModel::from_bytes(bytes)?))
        }
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(bytes: &[u8]) -> Result<Box<dyn Scorer>, ModelError> {
    Ok(Box::new(crate::models::onnx::OnnxModel::from_bytes(bytes)?))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(_bytes: &[u8]) -> Result<Box<dyn Scorer>, ModelError> {
    Err(ModelError::FormatUnavailable("onnx"))
}
