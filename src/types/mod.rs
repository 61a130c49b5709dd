//! Type definitions for uploaded and scored transaction tables

pub mod table;

pub use table::{CellValue, ScoreResponse, ScoredTable, TransactionTable, PROBABILITY_COLUMN};
