//! ONNX classifier backend

use crate::error::ModelError;
use crate::models::{FeatureMatrix, Scorer};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::sync::Mutex;
use tracing::{debug, info};

/// ONNX Runtime session scoring `[rows, features]` float inputs
pub struct OnnxModel {
    /// Runs need exclusive access to the session
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    num_features: usize,
}

impl OnnxModel {
    /// Build a session from serialized model bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        ort::init().commit()?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_memory(bytes)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| ModelError::Unsupported("ONNX graph has no inputs".to_string()))?;
        let input_name = input.name.clone();
        let num_features = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.last().copied())
            .filter(|dim| *dim > 0)
            .map(|dim| dim as usize)
            .unwrap_or(0);

        // Classifier exports name the score output "probabilities"; fall back to the last one
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelError::Unsupported("ONNX graph has no outputs".to_string()))?;

        info!(
            input = %input_name,
            output = %output_name,
            features = num_features,
            "ONNX model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            num_features,
        })
    }

    fn extract_probabilities(
        &self,
        outputs: &SessionOutputs,
        rows: usize,
    ) -> Result<Vec<f64>, ModelError> {
        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ModelError::Output(format!("output `{}` missing from run", self.output_name))
        })?;

        // Tensor format (XGBoost, Random Forest, sklearn with zipmap disabled)
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return probabilities_from_tensor(&dims, data, rows);
        }

        // seq(map(int64, float)) format (LightGBM / CatBoost with zipmap)
        let dtype = output.dtype();
        if DynSequenceValueType::can_downcast(&dtype) {
            return self.extract_from_sequence_map(output, rows);
        }

        Err(ModelError::Output(format!(
            "output `{}` is neither a float tensor nor a sequence of maps",
            self.output_name
        )))
    }

    fn extract_from_sequence_map(
        &self,
        output: &DynValue,
        rows: usize,
    ) -> Result<Vec<f64>, ModelError> {
        let allocator = Allocator::default();
        let sequence = output.downcast_ref::<DynSequenceValueType>()?;
        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

        if maps.len() != rows {
            return Err(ModelError::RowCount {
                expected: rows,
                actual: maps.len(),
            });
        }

        maps.iter()
            .map(|map| {
                let pairs = map.try_extract_key_values::<i64, f32>()?;
                fraud_class_probability(&pairs)
            })
            .collect()
    }
}

impl Scorer for OnnxModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, rows: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let shape = vec![rows.len() as i64, rows.width() as i64];
        let data: Vec<f32> = rows.as_slice().iter().map(|v| *v as f32).collect();
        let input = Tensor::from_array((shape, data))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Output(format!("session lock poisoned: {}", e)))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
        let probabilities = self.extract_probabilities(&outputs, rows.len())?;

        debug!(rows = rows.len(), "ONNX batch scored");
        Ok(probabilities)
    }
}

/// Probability of class 1 from a map of class id to probability
fn fraud_class_probability(pairs: &[(i64, f32)]) -> Result<f64, ModelError> {
    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 1) {
        return Ok(*p as f64);
    }
    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 0) {
        return Ok(1.0 - *p as f64);
    }
    Err(ModelError::Output(
        "probability map has neither class 0 nor class 1".to_string(),
    ))
}

/// Fraud probability per row from a `[rows, classes]`, `[rows, 1]` or `[rows]` tensor
fn probabilities_from_tensor(dims: &[i64], data: &[f32], rows: usize) -> Result<Vec<f64>, ModelError> {
    let (batch, classes) = match dims {
        [batch] => (*batch as usize, 1),
        [batch, classes] => (*batch as usize, *classes as usize),
        _ => {
            return Err(ModelError::Output(format!(
                "unexpected probability tensor shape {:?}",
                dims
            )))
        }
    };

    if batch != rows || classes == 0 || data.len() != batch * classes {
        return Err(ModelError::Output(format!(
            "probability tensor shape {:?} does not match {} rows",
            dims, rows
        )));
    }

    let column = if classes >= 2 { 1 } else { 0 };
    Ok(data
        .chunks_exact(classes)
        .map(|row| row[column] as f64)
        .collect())
}
