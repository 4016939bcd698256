//! rcm-predict - Reactor coking prediction batch service
//!
//! Periodically pulls raw temperature and chemical-analysis series from a
//! relational source, derives per-sensor feature vectors, evaluates
//! pre-trained models through the sensor → plate → reactor fallback
//! hierarchy, and appends coking probabilities plus derived temperature
//! statistics back to a relational sink, incrementally.

pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod topology;

pub use crate::error::{PredictError, PredictResult};
