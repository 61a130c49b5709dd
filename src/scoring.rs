//! Scoring of one uploaded CSV against the installed model

use crate::error::PredictError;
use crate::feature_extractor::FeatureExtractor;
use crate::models::LoadedModel;
use crate::types::{ScoredTable, TransactionTable};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Parse, validate and score an uploaded CSV.
///
/// Column validation happens before any inference, so a table missing a
/// feature never reaches the model.
pub fn score_upload(model: &LoadedModel, csv: &[u8]) -> Result<ScoredTable, PredictError> {
    let table = TransactionTable::from_csv(csv)?;
    info!(rows = table.len(), columns = table.columns().len(), "Parsed uploaded CSV");

    let extractor = FeatureExtractor::new(model.features());
    let missing = extractor.missing_columns(&table);
    if !missing.is_empty() {
        return Err(PredictError::MissingColumns(missing));
    }

    let matrix = extractor.extract(&table)?;
    let probabilities = model.predict(&matrix)?;
    debug!(rows = probabilities.len(), "Scored rows");

    Ok(table.into_scored(probabilities))
}

/// Run [`score_upload`] on the blocking pool; parsing and tree traversal are CPU bound.
pub async fn score_upload_blocking(
    model: Arc<LoadedModel>,
    csv: Bytes,
) -> Result<ScoredTable, PredictError> {
    tokio::task::spawn_blocking(move || score_upload(&model, &csv))
        .await
        .map_err(|e| PredictError::Task(e.to_string()))?
}
