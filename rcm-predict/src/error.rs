//! Error types for rcm-predict
//!
//! Topology and configuration errors indicate the input cannot be trusted
//! and always abort the run. `MissingModel` is recoverable per sensor: the
//! pipeline logs it and leaves that sensor out of the batch.

use thiserror::Error;

/// Result type for prediction-run operations
pub type PredictResult<T> = Result<T, PredictError>;

#[derive(Debug, Error)]
pub enum PredictError {
    /// Sensor ID not present on any plate of the reactor (configuration bug)
    #[error("sensor {sensor} not found in reactor {reactor}")]
    UnknownSensor { reactor: String, sensor: String },

    /// Plate name not part of the reactor's stack (configuration bug)
    #[error("plate {plate} not found in reactor {reactor}")]
    UnknownPlate { reactor: String, plate: String },

    /// Required chemical-analysis tags absent from the source data
    #[error("missing analysis tags: {}", .0.join(", "))]
    MissingTags(Vec<String>),

    /// No model at sensor, plate, or reactor level
    #[error("no {kind} model for sensor {sensor} in reactor {reactor}")]
    MissingModel {
        reactor: String,
        sensor: String,
        kind: &'static str,
    },

    /// Invalid extraction parameters, detected before any data is processed
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed model artifact
    #[error("bad model artifact {path}: {reason}")]
    BadArtifact { path: String, reason: String },

    /// Database operation error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// rcm-common error
    #[error(transparent)]
    Common(#[from] rcm_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
