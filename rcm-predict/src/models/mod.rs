//! Pre-trained model artifacts
//!
//! Three model kinds feed the pipeline, each treated as an immutable, opaque
//! callable with a fixed input/output shape:
//! - `encoder` maps windowed temperature sub-interval means to an embedding,
//! - `trend` parameterizes the OLS trend extractor with its tracked tag list,
//! - `prediction` maps a feature row to a coking probability per horizon.
//!
//! Artifacts are loaded once at startup (see [`loader`]) and resolved per
//! sensor through the hierarchy in [`repository`].

pub mod loader;
pub mod repository;

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::error::{PredictError, PredictResult};

/// The three model kinds of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Encoder,
    Trend,
    Prediction,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Encoder => "encoder",
            ModelKind::Trend => "trend",
            ModelKind::Prediction => "prediction",
        }
    }
}

/// Windowed-temperature embedding capability.
pub trait Encode: Send + Sync {
    /// Map normalized sub-interval means to a fixed-size embedding.
    fn encode(&self, interval_means: &[f64]) -> PredictResult<Vec<f64>>;

    fn input_width(&self) -> usize;

    fn output_width(&self) -> usize;
}

/// Coking-probability capability for one forecast horizon.
pub trait PredictProba: Send + Sync {
    /// Probability of coking in `[0, 1]` for one feature row.
    fn predict_proba(&self, features: &[f64]) -> PredictResult<f64>;
}

/// Single dense layer with tanh activation over the encoder window means.
#[derive(Debug, Clone)]
pub struct DenseEncoder {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseEncoder {
    /// Build from row-major weights (`outputs x inputs`) and a bias vector.
    pub fn new(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> PredictResult<Self> {
        let outputs = weights.len();
        let inputs = weights.first().map(Vec::len).unwrap_or(0);
        if outputs == 0 || inputs == 0 {
            return Err(PredictError::InvalidConfiguration(
                "encoder weight matrix is empty".to_string(),
            ));
        }
        if weights.iter().any(|row| row.len() != inputs) {
            return Err(PredictError::InvalidConfiguration(
                "encoder weight matrix is ragged".to_string(),
            ));
        }
        if bias.len() != outputs {
            return Err(PredictError::InvalidConfiguration(format!(
                "encoder bias has {} entries for {} outputs",
                bias.len(),
                outputs
            )));
        }
        let flat: Vec<f64> = weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((outputs, inputs), flat)
            .map_err(|e| PredictError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            weights,
            bias: Array1::from_vec(bias),
        })
    }
}

impl Encode for DenseEncoder {
    fn encode(&self, interval_means: &[f64]) -> PredictResult<Vec<f64>> {
        if interval_means.len() != self.input_width() {
            return Err(PredictError::InvalidConfiguration(format!(
                "encoder expects {} interval means, got {}",
                self.input_width(),
                interval_means.len()
            )));
        }
        let x = Array1::from_vec(interval_means.to_vec());
        let y = self.weights.dot(&x) + &self.bias;
        Ok(y.into_iter().map(f64::tanh).collect())
    }

    fn input_width(&self) -> usize {
        self.weights.ncols()
    }

    fn output_width(&self) -> usize {
        self.weights.nrows()
    }
}

/// Logistic regression over one feature row.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticModel {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl PredictProba for LogisticModel {
    fn predict_proba(&self, features: &[f64]) -> PredictResult<f64> {
        if features.len() != self.weights.len() {
            return Err(PredictError::InvalidConfiguration(format!(
                "prediction model expects {} features, got {}",
                self.weights.len(),
                features.len()
            )));
        }
        let z: f64 = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// The prediction artifact at one hierarchy scope: one model per horizon.
pub struct HorizonModels {
    models: BTreeMap<String, Arc<dyn PredictProba>>,
}

impl HorizonModels {
    pub fn new(models: BTreeMap<String, Arc<dyn PredictProba>>) -> Self {
        Self { models }
    }

    /// Horizons in deterministic (lexicographic) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn PredictProba>)> {
        self.models.iter().map(|(h, m)| (h.as_str(), m))
    }
}

/// The trend artifact: the fixed list of chemical-analysis tags to fit.
#[derive(Debug, Clone, Deserialize)]
pub struct TrendSpec {
    pub tags: Vec<String>,
}
