//! Model artifact loading
//!
//! Artifacts live under `<artifact_dir>/<reactor>/<kind>/<scope>.json`,
//! where `scope` is a reactor name, plate name, or sensor ID. A missing
//! file is a normal outcome at load time (the hierarchy fills the gap);
//! a file that exists but does not parse is a hard `BadArtifact` error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{PredictError, PredictResult};
use crate::models::{DenseEncoder, Encode, HorizonModels, LogisticModel, ModelKind, PredictProba, TrendSpec};

/// Read access to the pre-trained model artifact store.
///
/// `Ok(None)` means "no artifact at this scope", which is expected.
pub trait ArtifactStore {
    fn load_encoder(&self, reactor: &str, scope: &str) -> PredictResult<Option<Arc<dyn Encode>>>;

    fn load_trend(&self, reactor: &str, scope: &str) -> PredictResult<Option<Arc<TrendSpec>>>;

    fn load_prediction(
        &self,
        reactor: &str,
        scope: &str,
    ) -> PredictResult<Option<Arc<HorizonModels>>>;
}

/// Artifact store over a directory of JSON documents.
pub struct JsonArtifactStore {
    root: PathBuf,
}

#[derive(Deserialize)]
struct EncoderDoc {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

#[derive(Deserialize)]
struct PredictionDoc {
    horizons: BTreeMap<String, LogisticModel>,
}

impl JsonArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, reactor: &str, kind: ModelKind, scope: &str) -> PathBuf {
        self.root
            .join(reactor)
            .join(kind.as_str())
            .join(format!("{}.json", scope))
    }

    fn read_doc<T: serde::de::DeserializeOwned>(path: &Path) -> PredictResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let doc = serde_json::from_str(&raw).map_err(|e| PredictError::BadArtifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(doc))
    }

    /// Total number of artifact documents on disk, for startup reporting.
    pub fn artifact_count(&self) -> usize {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "json")
            })
            .count()
    }
}

impl ArtifactStore for JsonArtifactStore {
    fn load_encoder(&self, reactor: &str, scope: &str) -> PredictResult<Option<Arc<dyn Encode>>> {
        let path = self.artifact_path(reactor, ModelKind::Encoder, scope);
        let doc: Option<EncoderDoc> = Self::read_doc(&path)?;
        match doc {
            Some(doc) => {
                let encoder = DenseEncoder::new(doc.weights, doc.bias).map_err(|e| {
                    PredictError::BadArtifact {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(Arc::new(encoder)))
            }
            None => Ok(None),
        }
    }

    fn load_trend(&self, reactor: &str, scope: &str) -> PredictResult<Option<Arc<TrendSpec>>> {
        let path = self.artifact_path(reactor, ModelKind::Trend, scope);
        let doc: Option<TrendSpec> = Self::read_doc(&path)?;
        Ok(doc.map(Arc::new))
    }

    fn load_prediction(
        &self,
        reactor: &str,
        scope: &str,
    ) -> PredictResult<Option<Arc<HorizonModels>>> {
        let path = self.artifact_path(reactor, ModelKind::Prediction, scope);
        let doc: Option<PredictionDoc> = Self::read_doc(&path)?;
        match doc {
            Some(doc) => {
                if doc.horizons.is_empty() {
                    return Err(PredictError::BadArtifact {
                        path: path.display().to_string(),
                        reason: "prediction artifact declares no horizons".to_string(),
                    });
                }
                let models: BTreeMap<String, Arc<dyn PredictProba>> = doc
                    .horizons
                    .into_iter()
                    .map(|(horizon, model)| (horizon, Arc::new(model) as Arc<dyn PredictProba>))
                    .collect();
                Ok(Some(Arc::new(HorizonModels::new(models))))
            }
            None => Ok(None),
        }
    }
}
