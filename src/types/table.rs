//! Uploaded transaction tables and their scored form

use crate::error::PredictError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Column appended to every scored row
pub const PROBABILITY_COLUMN: &str = "fraud_probability";

/// Cell spellings read as missing values, besides the empty cell
const NA_VALUES: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single parsed cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl CellValue {
    /// Value handed to the model; `None` means the cell is not numeric.
    /// Missing cells become NaN.
    pub fn as_feature(&self) -> Option<f64> {
        match self {
            CellValue::Null => Some(f64::NAN),
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            CellValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            CellValue::Text(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Int(v) => Value::from(*v),
            CellValue::Float(v) => Value::from(*v),
            CellValue::Bool(v) => Value::Bool(*v),
            CellValue::Text(v) => Value::String(v.clone()),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

fn is_missing(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || NA_VALUES.contains(&trimmed)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Infer one type for a whole column.
///
/// Integer and boolean columns cannot hold missing cells; a column with gaps
/// and otherwise numeric values is read as float.
fn infer_kind<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> ColumnKind {
    let has_missing = cells.clone().any(is_missing);
    let mut present = cells.filter(|c| !is_missing(c));

    if !has_missing && present.clone().all(|c| c.trim().parse::<i64>().is_ok()) {
        return ColumnKind::Int;
    }
    if present.clone().all(|c| c.trim().parse::<f64>().is_ok()) {
        return ColumnKind::Float;
    }
    if !has_missing && present.all(|c| parse_bool(c).is_some()) {
        return ColumnKind::Bool;
    }
    ColumnKind::Text
}

fn parse_cell(cell: &str, kind: ColumnKind) -> CellValue {
    if is_missing(cell) {
        return CellValue::Null;
    }
    let trimmed = cell.trim();
    match kind {
        ColumnKind::Int => trimmed.parse().map(CellValue::Int).unwrap_or(CellValue::Null),
        ColumnKind::Float => trimmed.parse().map(CellValue::Float).unwrap_or(CellValue::Null),
        ColumnKind::Bool => parse_bool(trimmed).map(CellValue::Bool).unwrap_or(CellValue::Null),
        ColumnKind::Text => CellValue::Text(cell.to_string()),
    }
}

/// Give repeated header names `.1`, `.2`, ... suffixes
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    headers
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while seen.contains(&candidate) {
                candidate = format!("{}.{}", name, n);
                n += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Rows of an uploaded CSV, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl TransactionTable {
    /// Parse a CSV document whose first record is the header.
    ///
    /// Rows shorter than the header are padded with missing cells; longer
    /// rows fail the parse.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, PredictError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(PredictError::EmptyCsv);
        }
        let columns = dedupe_headers(headers.iter().map(str::to_string).collect());

        let records = reader
            .records()
            .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;
        if let Some(record) = records.iter().find(|r| r.len() > columns.len()) {
            return Err(PredictError::ExtraFields {
                line: record.position().map(|p| p.line()).unwrap_or(0),
                expected: columns.len(),
                found: record.len(),
            });
        }

        let kinds: Vec<ColumnKind> = (0..columns.len())
            .map(|col| infer_kind(records.iter().map(move |r| r.get(col).unwrap_or(""))))
            .collect();

        let rows = records
            .iter()
            .map(|record| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(col, kind)| parse_cell(record.get(col).unwrap_or(""), *kind))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Attach one probability per row.
    pub fn into_scored(self, probabilities: Vec<f64>) -> ScoredTable {
        debug_assert_eq!(self.rows.len(), probabilities.len());
        ScoredTable {
            table: self,
            probabilities,
        }
    }
}

/// A transaction table with its fraud probabilities
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTable {
    table: TransactionTable,
    probabilities: Vec<f64>,
}

impl ScoredTable {
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Build the response body: original columns in order, then the probability.
    ///
    /// An input column already named `fraud_probability` keeps its position
    /// and takes the new value.
    pub fn into_response(self) -> ScoreResponse {
        let ScoredTable {
            table,
            probabilities,
        } = self;
        let total_rows = table.rows.len();

        let predictions = table
            .rows
            .into_iter()
            .zip(probabilities)
            .map(|(row, probability)| {
                let mut object = Map::with_capacity(table.columns.len() + 1);
                for (column, cell) in table.columns.iter().zip(row.iter()) {
                    object.insert(column.clone(), cell.to_json());
                }
                object.insert(PROBABILITY_COLUMN.to_string(), Value::from(probability));
                object
            })
            .collect();

        ScoreResponse {
            total_rows,
            predictions,
        }
    }
}

/// JSON body of a successful `/predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub total_rows: usize,
    pub predictions: Vec<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_infers_column_types() {
        let table =
            TransactionTable::from_csv(b"amount,hour,id,flag\n100.5,3,A1,true\n5,14,A2,False\n")
                .unwrap();

        assert_eq!(table.columns(), &["amount", "hour", "id", "flag"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.rows()[0],
            vec![
                CellValue::Float(100.5),
                CellValue::Int(3),
                CellValue::Text("A1".into()),
                CellValue::Bool(true)
            ]
        );
        assert_eq!(table.rows()[1][0], CellValue::Float(5.0));
        assert_eq!(table.rows()[1][3], CellValue::Bool(false));
    }

    #[test]
    fn test_missing_cells() {
        let table = TransactionTable::from_csv(b"amount,note\n,hello\nNaN,\n7,NA\n").unwrap();
        assert_eq!(table.rows()[0][0], CellValue::Null);
        assert_eq!(table.rows()[1][0], CellValue::Null);
        // integer-looking column with gaps reads as float
        assert_eq!(table.rows()[2][0], CellValue::Float(7.0));
        assert_eq!(table.rows()[1][1], CellValue::Null);
        assert_eq!(table.rows()[2][1], CellValue::Null);
        assert!(table.rows()[0][0].as_feature().unwrap().is_nan());
    }

    #[test]
    fn test_text_is_not_a_feature() {
        assert_eq!(CellValue::Text("x".into()).as_feature(), None);
        assert_eq!(CellValue::Bool(true).as_feature(), Some(1.0));
        assert_eq!(CellValue::Int(-4).as_feature(), Some(-4.0));
    }

    #[test]
    fn test_bom_and_duplicate_headers() {
        let table = TransactionTable::from_csv(b"\xEF\xBB\xBFa,a,b,a\n1,2,3,4\n").unwrap();
        assert_eq!(table.columns(), &["a", "a.1", "b", "a.2"]);
        assert_eq!(table.column_index("a.2"), Some(3));
    }

    #[test]
    fn test_header_only_csv_has_no_rows() {
        let table = TransactionTable::from_csv(b"amount,hour\n").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 2);
    }

    #[test]
    fn test_empty_csv_fails() {
        assert!(matches!(
            TransactionTable::from_csv(b""),
            Err(PredictError::EmptyCsv)
        ));
    }

    #[test]
    fn test_short_rows_are_padded_with_missing_cells() {
        let table = TransactionTable::from_csv(b"amount,hour,id\n100,3,A1\n5,14\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].len(), 3);
        assert_eq!(table.rows()[1][2], CellValue::Null);
        assert_eq!(table.rows()[1][1], CellValue::Int(14));

        let table = TransactionTable::from_csv(b"amount,hour\n1,2\n3\n").unwrap();
        assert_eq!(table.rows()[1][0], CellValue::Float(3.0));
        assert_eq!(table.rows()[1][1], CellValue::Null);
    }

    #[test]
    fn test_rows_longer_than_header_fail() {
        match TransactionTable::from_csv(b"a,b\n1,2\n3,4,5\n") {
            Err(PredictError::ExtraFields {
                line,
                expected,
                found,
            }) => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected extra fields error, got {:?}", other),
        }
    }

    #[test]
    fn test_response_preserves_order_and_columns() {
        let table = TransactionTable::from_csv(b"amount,hour,id\n100,3,A1\n5,14,A2\n").unwrap();
        let response = table.into_scored(vec![0.2, 0.4]).into_response();

        assert_eq!(response.total_rows, 2);
        assert_eq!(response.predictions.len(), 2);
        let keys: Vec<&str> = response.predictions[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["amount", "hour", "id", PROBABILITY_COLUMN]);
        assert_eq!(response.predictions[0]["id"], "A1");
        assert_eq!(response.predictions[1]["id"], "A2");
        assert_eq!(response.predictions[1][PROBABILITY_COLUMN], 0.4);
        assert_eq!(response.predictions[0]["amount"], 100);
    }

    #[test]
    fn test_existing_probability_column_is_replaced() {
        let table =
            TransactionTable::from_csv(b"fraud_probability,amount\nold,1\n").unwrap();
        let response = table.into_scored(vec![0.9]).into_response();

        let row = &response.predictions[0];
        assert_eq!(row.len(), 2);
        assert_eq!(row.keys().next().map(String::as_str), Some(PROBABILITY_COLUMN));
        assert_eq!(row[PROBABILITY_COLUMN], 0.9);
    }

    #[test]
    fn test_non_finite_values_serialize_as_null() {
        assert_eq!(CellValue::Float(f64::INFINITY).to_json(), Value::Null);
        assert_eq!(CellValue::Null.to_json(), Value::Null);
    }
}
