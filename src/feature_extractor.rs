//! Feature extraction for fraud model inference.
//!
//! Selects the metadata-listed columns from an uploaded table, in metadata
//! order, and turns them into the dense matrix the model scores.

use crate::error::PredictError;
use crate::models::FeatureMatrix;
use crate::types::TransactionTable;

/// Feature extractor bound to the feature list of the installed model.
pub struct FeatureExtractor<'a> {
    features: &'a [String],
}

impl<'a> FeatureExtractor<'a> {
    /// Create an extractor for the given ordered feature names.
    pub fn new(features: &'a [String]) -> Self {
        Self { features }
    }

    /// Feature names absent from the table, in metadata order, without repeats.
    pub fn missing_columns(&self, table: &TransactionTable) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        for feature in self.features {
            if table.column_index(feature).is_none() && !missing.contains(feature) {
                missing.push(feature.clone());
            }
        }
        missing
    }

    /// Build the feature matrix, one row per table row.
    ///
    /// Missing cells are passed to the model as NaN. A text cell in a feature
    /// column fails the whole request.
    pub fn extract(&self, table: &TransactionTable) -> Result<FeatureMatrix, PredictError> {
        let missing = self.missing_columns(table);
        if !missing.is_empty() {
            return Err(PredictError::MissingColumns(missing));
        }

        let indices: Vec<usize> = self
            .features
            .iter()
            .filter_map(|feature| table.column_index(feature))
            .collect();

        let mut matrix = FeatureMatrix::with_capacity(indices.len(), table.len());
        let mut row_values = Vec::with_capacity(indices.len());

        for (row_number, row) in table.rows().iter().enumerate() {
            row_values.clear();
            for (feature, &col) in self.features.iter().zip(&indices) {
                let cell = &row[col];
                let value = cell
                    .as_feature()
                    .ok_or_else(|| PredictError::NonNumericFeature {
                        column: feature.clone(),
                        row: row_number,
                        value: cell.to_string(),
                    })?;
                row_values.push(value);
            }
            matrix.push_row(&row_values);
        }

        Ok(matrix)
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_feature_extraction_follows_metadata_order() {
        let names = features(&["hour", "amount"]);
        let extractor = FeatureExtractor::new(&names);
        let table =
            TransactionTable::from_csv(b"id,amount,hour\nA1,100,3\nA2,5,14\n").unwrap();

        let matrix = extractor.extract(&table).unwrap();

        assert_eq!(matrix.width(), extractor.feature_count());
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.row(0), &[3.0, 100.0]);
        assert_eq!(matrix.row(1), &[14.0, 5.0]);
    }

    #[test]
    fn test_missing_columns_in_metadata_order() {
        let names = features(&["amount", "hour", "merchant", "hour"]);
        let extractor = FeatureExtractor::new(&names);
        let table = TransactionTable::from_csv(b"merchant\n7\n").unwrap();

        assert_eq!(extractor.missing_columns(&table), vec!["amount", "hour"]);
        match extractor.extract(&table) {
            Err(PredictError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["amount", "hour"])
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_cells_become_nan() {
        let names = features(&["amount", "hour"]);
        let extractor = FeatureExtractor::new(&names);
        let table = TransactionTable::from_csv(b"amount,hour\n100,\n5,14\n").unwrap();

        let matrix = extractor.extract(&table).unwrap();
        assert_eq!(matrix.row(0)[0], 100.0);
        assert!(matrix.row(0)[1].is_nan());
    }

    #[test]
    fn test_text_feature_is_rejected() {
        let names = features(&["amount"]);
        let extractor = FeatureExtractor::new(&names);
        let table = TransactionTable::from_csv(b"amount\n12\nlots\n").unwrap();

        match extractor.extract(&table) {
            Err(PredictError::NonNumericFeature { column, value, .. }) => {
                assert_eq!(column, "amount");
                assert_eq!(value, "12");
            }
            other => panic!("expected non-numeric feature, got {:?}", other),
        }
    }

    #[test]
    fn test_header_only_table_gives_empty_matrix() {
        let names = features(&["amount"]);
        let extractor = FeatureExtractor::new(&names);
        let table = TransactionTable::from_csv(b"amount\n").unwrap();

        let matrix = extractor.extract(&table).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.width(), 1);
    }
}
