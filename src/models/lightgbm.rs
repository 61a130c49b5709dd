//! LightGBM text model evaluator
//!
//! Reads the format written by `Booster.save_model()` / `model_to_string()`:
//!
//! ```text
//! tree
//! version=v4
//! max_feature_idx=1
//! objective=binary sigmoid:1
//! feature_names=amount hour
//!
//! Tree=0
//! num_leaves=3
//! split_feature=0 1
//! threshold=500 6.5
//! decision_type=2 2
//! left_child=1 -1
//! right_child=-2 -3
//! leaf_value=-1.5 0.75 -0.25
//!
//! end of trees
//! ```
//!
//! Child indices `>= 0` point at internal nodes, negative ones at leaf `!child`.
//! Leaf values already include shrinkage, so the raw score is their sum.

use crate::error::ModelError;
use crate::models::{FeatureMatrix, Scorer};
use std::collections::HashMap;
use std::str::FromStr;

const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: u8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// Transform applied to the raw ensemble score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputTransform {
    /// `1 / (1 + exp(-k * raw))`
    Sigmoid(f64),
    /// `exp(raw)`, for log-link objectives
    Exp,
    /// `sign(raw) * raw^2`, for regression trained on `sqrt` labels
    SignedSquare,
    Identity,
}

impl OutputTransform {
    fn from_objective(objective: &str) -> Result<Self, ModelError> {
        let mut parts = objective.split_whitespace();
        let name = parts.next().unwrap_or("regression");
        let sqrt = parts.any(|p| p == "sqrt");
        let param = |key: &str| {
            objective
                .split_whitespace()
                .filter_map(|p| p.split_once(':'))
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| v.parse::<f64>().ok())
        };

        match name {
            "binary" => Ok(OutputTransform::Sigmoid(param("sigmoid").unwrap_or(1.0))),
            "cross_entropy" | "xentropy" => Ok(OutputTransform::Sigmoid(1.0)),
            "poisson" | "gamma" | "tweedie" => Ok(OutputTransform::Exp),
            "regression" | "regression_l2" | "l2" | "mean_squared_error" | "mse" | "rmse"
            | "root_mean_squared_error" | "regression_l1" | "l1" | "mean_absolute_error"
            | "mae" | "huber" | "fair" | "quantile" | "mape"
                if sqrt =>
            {
                Ok(OutputTransform::SignedSquare)
            }
            "multiclass" | "softmax" | "multiclassova" | "multiclass_ova" | "ova" | "ovr" => Err(
                ModelError::Unsupported(format!("multiclass objective `{}`", name)),
            ),
            "cross_entropy_lambda" | "xentlambda" => Err(ModelError::Unsupported(format!(
                "objective `{}`",
                name
            ))),
            _ => Ok(OutputTransform::Identity),
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            OutputTransform::Sigmoid(k) => 1.0 / (1.0 + (-k * raw).exp()),
            OutputTransform::Exp => raw.exp(),
            OutputTransform::SignedSquare => raw.signum() * raw * raw,
            OutputTransform::Identity => raw,
        }
    }
}

#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
    cat_boundaries: Vec<usize>,
    cat_threshold: Vec<u32>,
}

impl Tree {
    fn leaf_value(&self, row: &[f64]) -> f64 {
        if self.split_feature.is_empty() {
            return self.leaf_value[0];
        }

        let mut node = 0usize;
        loop {
            let fval = row[self.split_feature[node]];
            let next = if self.decision_type[node] & CATEGORICAL_MASK != 0 {
                self.categorical_decision(fval, node)
            } else {
                self.numerical_decision(fval, node)
            };
            if next < 0 {
                return self.leaf_value[!next as usize];
            }
            node = next as usize;
        }
    }

    fn numerical_decision(&self, fval: f64, node: usize) -> i32 {
        let decision_type = self.decision_type[node];
        let missing_type = MissingType::from_decision_type(decision_type);
        let mut fval = fval;
        if fval.is_nan() && missing_type != MissingType::NaN {
            fval = 0.0;
        }

        let is_missing = match missing_type {
            MissingType::Zero => fval.abs() <= ZERO_THRESHOLD,
            MissingType::NaN => fval.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            return if decision_type & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
        }

        if fval <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn categorical_decision(&self, fval: f64, node: usize) -> i32 {
        if fval.is_nan() {
            return self.right_child[node];
        }
        // Truncate first: values in (-1, 0) read as category 0
        let category = fval as i64;
        if category < 0 {
            return self.right_child[node];
        }
        let category = category as u64;
        let cat_idx = self.threshold[node] as usize;
        let start = self.cat_boundaries[cat_idx];
        let end = self.cat_boundaries[cat_idx + 1];
        let bitset = &self.cat_threshold[start..end];

        let word = (category / 32) as usize;
        let in_set = word < bitset.len() && (bitset[word] >> (category % 32)) & 1 == 1;
        if in_set {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }
}

/// A parsed LightGBM gradient-boosted tree ensemble
#[derive(Debug, Clone)]
pub struct LightGbmModel {
    trees: Vec<Tree>,
    num_features: usize,
    feature_names: Vec<String>,
    transform: OutputTransform,
    average_output: bool,
}

impl LightGbmModel {
    /// Parse a model from the raw object bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        std::str::from_utf8(bytes)?.parse()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Feature names recorded by the trainer, if any
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    /// Untransformed ensemble score for one row
    pub fn predict_raw(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.leaf_value(row)).sum();
        if self.average_output && !self.trees.is_empty() {
            sum / self.trees.len() as f64
        } else {
            sum
        }
    }

    /// Transformed score (a probability for binary models) for one row
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.transform.apply(self.predict_raw(row))
    }
}

impl Scorer for LightGbmModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, rows: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        if rows.width() < self.num_features {
            return Err(ModelError::FeatureWidth {
                expected: self.num_features,
                actual: rows.width(),
            });
        }
        Ok(rows.rows().map(|row| self.predict_row(row)).collect())
    }
}

/// `key=value` lines of one section, with the line each key came from
#[derive(Default)]
struct Section<'a> {
    values: HashMap<&'a str, (usize, &'a str)>,
    flags: Vec<&'a str>,
}

impl<'a> Section<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).map(|(_, v)| *v)
    }

    fn line_of(&self, key: &str) -> usize {
        self.values.get(key).map(|(line, _)| *line).unwrap_or(0)
    }
}

impl FromStr for LightGbmModel {
    type Err = ModelError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            Some((_, "tree")) => {}
            other => {
                return Err(ModelError::Parse {
                    line: other.map(|(line, _)| line).unwrap_or(1),
                    message: "not a LightGBM text model (missing `tree` header)".to_string(),
                })
            }
        }

        let mut header = Section::default();
        let mut blocks: Vec<Section> = Vec::new();

        for (line, content) in lines {
            if content == "end of trees" {
                break;
            }
            if content.starts_with("Tree=") {
                blocks.push(Section::default());
                continue;
            }
            let section = blocks.last_mut().unwrap_or(&mut header);
            match content.split_once('=') {
                Some((key, value)) => {
                    section.values.insert(key.trim(), (line, value.trim()));
                }
                None => section.flags.push(content),
            }
        }

        let max_feature_idx: i64 = header
            .get("max_feature_idx")
            .ok_or_else(|| ModelError::Parse {
                line: 1,
                message: "header is missing `max_feature_idx`".to_string(),
            })?
            .parse()
            .map_err(|_| ModelError::Parse {
                line: header.line_of("max_feature_idx"),
                message: "`max_feature_idx` is not an integer".to_string(),
            })?;
        let num_features = usize::try_from(max_feature_idx + 1).map_err(|_| ModelError::Parse {
            line: header.line_of("max_feature_idx"),
            message: format!("invalid `max_feature_idx` {}", max_feature_idx),
        })?;

        for key in ["num_class", "num_tree_per_iteration"] {
            if let Some(value) = header.get(key) {
                if value != "1" {
                    return Err(ModelError::Unsupported(format!("{}={}", key, value)));
                }
            }
        }

        let transform = OutputTransform::from_objective(header.get("objective").unwrap_or(""))?;
        let feature_names = header
            .get("feature_names")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let average_output = header.flags.contains(&"average_output");

        let trees = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| parse_tree(index, block, num_features))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            trees,
            num_features,
            feature_names,
            transform,
            average_output,
        })
    }
}

fn parse_array<T: FromStr>(
    block: &Section,
    tree: usize,
    key: &str,
    expected: usize,
) -> Result<Vec<T>, ModelError> {
    let raw = block.get(key).unwrap_or("");
    let values = raw
        .split_whitespace()
        .map(|v| v.parse::<T>())
        .collect::<Result<Vec<T>, _>>()
        .map_err(|_| ModelError::Parse {
            line: block.line_of(key),
            message: format!("tree {}: `{}` holds a malformed value", tree, key),
        })?;

    if values.len() != expected {
        return Err(ModelError::InvalidTree {
            tree,
            message: format!("`{}` has {} values, expected {}", key, values.len(), expected),
        });
    }
    Ok(values)
}

fn parse_tree(index: usize, block: &Section, num_features: usize) -> Result<Tree, ModelError> {
    let invalid = |message: String| ModelError::InvalidTree {
        tree: index,
        message,
    };

    let num_leaves: usize = block
        .get("num_leaves")
        .ok_or_else(|| invalid("missing `num_leaves`".to_string()))?
        .parse()
        .map_err(|_| invalid("`num_leaves` is not an integer".to_string()))?;
    if num_leaves == 0 {
        return Err(invalid("`num_leaves` is zero".to_string()));
    }
    if block.get("is_linear").is_some_and(|v| v != "0") {
        return Err(ModelError::Unsupported(format!("linear tree {}", index)));
    }

    let num_cat: usize = block
        .get("num_cat")
        .unwrap_or("0")
        .parse()
        .map_err(|_| invalid("`num_cat` is not an integer".to_string()))?;
    let internal = num_leaves - 1;

    let leaf_value = parse_array::<f64>(block, index, "leaf_value", num_leaves)?;
    let split_feature = parse_array::<usize>(block, index, "split_feature", internal)?;
    let threshold = parse_array::<f64>(block, index, "threshold", internal)?;
    let decision_type = parse_array::<u8>(block, index, "decision_type", internal)?;
    let left_child = parse_array::<i32>(block, index, "left_child", internal)?;
    let right_child = parse_array::<i32>(block, index, "right_child", internal)?;

    let (cat_boundaries, cat_threshold) = if num_cat > 0 {
        let boundaries = parse_array::<usize>(block, index, "cat_boundaries", num_cat + 1)?;
        let words = boundaries.last().copied().unwrap_or(0);
        let bitset = parse_array::<u32>(block, index, "cat_threshold", words)?;
        (boundaries, bitset)
    } else {
        (Vec::new(), Vec::new())
    };

    // Children are created after their parents, so every internal child index
    // is larger than its parent's. Checking that here makes traversal total.
    for node in 0..internal {
        if split_feature[node] >= num_features {
            return Err(invalid(format!(
                "node {} splits on feature {} but the model has {}",
                node, split_feature[node], num_features
            )));
        }
        for child in [left_child[node], right_child[node]] {
            let valid = if child < 0 {
                (!child as usize) < num_leaves
            } else {
                (child as usize) > node && (child as usize) < internal
            };
            if !valid {
                return Err(invalid(format!("node {} has invalid child {}", node, child)));
            }
        }
        if decision_type[node] & CATEGORICAL_MASK != 0 {
            let cat_idx = threshold[node];
            if cat_idx < 0.0 || cat_idx as usize >= num_cat {
                return Err(invalid(format!(
                    "node {} references category set {} of {}",
                    node, cat_idx, num_cat
                )));
            }
            let (start, end) = (
                cat_boundaries[cat_idx as usize],
                cat_boundaries[cat_idx as usize + 1],
            );
            if start > end || end > cat_threshold.len() {
                return Err(invalid(format!("node {} has malformed category bounds", node)));
            }
        }
    }

    Ok(Tree {
        split_feature,
        threshold,
        decision_type,
        left_child,
        right_child,
        leaf_value,
        cat_boundaries,
        cat_threshold,
    })
}
