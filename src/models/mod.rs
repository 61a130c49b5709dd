//! ML model loading, caching and inference

pub mod cache;
pub mod lightgbm;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use cache::ModelCache;
pub use lightgbm::LightGbmModel;
pub use loader::ModelLoader;

use crate::config::ModelFormat;
use crate::error::{LoadError, ModelError};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A loaded scoring function: feature rows in, one probability per row out.
pub trait Scorer: Send + Sync {
    /// Number of columns each row must have; 0 when the model accepts any width
    fn num_features(&self) -> usize;

    /// Score every row, preserving order.
    fn predict(&self, rows: &FeatureMatrix) -> Result<Vec<f64>, ModelError>;
}

/// Metadata object published next to the model by the training pipeline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelMetadata {
    /// Input columns in the order the model expects them
    pub features: Vec<String>,
}

/// Dense row-major feature matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    width: usize,
    rows: usize,
    values: Vec<f64>,
}

impl FeatureMatrix {
    pub fn with_capacity(width: usize, rows: usize) -> Self {
        Self {
            width,
            rows: 0,
            values: Vec::with_capacity(width * rows),
        }
    }

    /// Append one row. Panics if the row width differs from the matrix width.
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(row.len(), self.width, "feature row width mismatch");
        self.values.extend_from_slice(row);
        self.rows += 1;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Model and metadata installed together in the cache
pub struct LoadedModel {
    scorer: Box<dyn Scorer>,
    pub metadata: ModelMetadata,
    pub format: ModelFormat,
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("metadata", &self.metadata)
            .field("format", &self.format)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    /// Pair a scorer with its metadata, checking that the two agree.
    ///
    /// A fixed-width model must read exactly the metadata's features.
    pub fn new(
        scorer: Box<dyn Scorer>,
        metadata: ModelMetadata,
        format: ModelFormat,
    ) -> Result<Self, LoadError> {
        let width = scorer.num_features();
        if width > 0 && width != metadata.features.len() {
            return Err(LoadError::FeatureCountMismatch {
                model: scorer.num_features(),
                metadata: metadata.features.len(),
            });
        }

        Ok(Self {
            scorer,
            metadata,
            format,
            loaded_at: Utc::now(),
        })
    }

    pub fn features(&self) -> &[String] {
        &self.metadata.features
    }

    /// Score every row; the result always has one entry per row.
    pub fn predict(&self, rows: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        let scores = self.scorer.predict(rows)?;
        if scores.len() != rows.len() {
            return Err(ModelError::RowCount {
                expected: rows.len(),
                actual: scores.len(),
            });
        }
        Ok(scores)
    }
}
