//! Windowed temperature embedding
//!
//! The trailing window of length P for the target sensor is partitioned
//! into N equal half-open sub-intervals: sub-interval `i` covers
//! `(t - (i+1)*P/N, t - i*P/N]`, adjacent with no overlap and no gap.
//! Each sub-interval mean is normalized with the fixed global constants
//! and empty sub-intervals contribute zero before the encoder runs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use rcm_common::config::FeatureParams;
use rcm_common::series::Frame;
use rcm_common::time::min_sampling_resolution;

use crate::error::{PredictError, PredictResult};
use crate::models::Encode;

/// Column-name prefix of the embedding outputs.
pub const EMBEDDING_PREFIX: &str = "temp_embed_";

pub struct WindowedEncoder {
    interval: Duration,
    intervals: usize,
    normalize_mean: f64,
    normalize_std: f64,
    model: Arc<dyn Encode>,
}

impl WindowedEncoder {
    /// Validates the window partition against the model shape and the
    /// minimum source sampling resolution.
    pub fn new(params: &FeatureParams, model: Arc<dyn Encode>) -> PredictResult<Self> {
        if params.encoder_intervals == 0 {
            return Err(PredictError::InvalidConfiguration(
                "encoder interval count must be positive".to_string(),
            ));
        }
        let interval = params.encoder_period() / params.encoder_intervals as i32;
        if interval <= min_sampling_resolution() {
            return Err(PredictError::InvalidConfiguration(format!(
                "encoder sub-interval {} must exceed the source sampling resolution",
                interval
            )));
        }
        if model.input_width() != params.encoder_intervals {
            return Err(PredictError::InvalidConfiguration(format!(
                "encoder model expects {} inputs, window is partitioned into {}",
                model.input_width(),
                params.encoder_intervals
            )));
        }
        if model.output_width() != params.encoder_outputs {
            return Err(PredictError::InvalidConfiguration(format!(
                "encoder model emits {} outputs, {} configured",
                model.output_width(),
                params.encoder_outputs
            )));
        }
        Ok(Self {
            interval,
            intervals: params.encoder_intervals,
            normalize_mean: params.normalize_mean,
            normalize_std: params.normalize_std,
            model,
        })
    }

    pub fn output_width(&self) -> usize {
        self.model.output_width()
    }

    /// Normalized sub-interval means for one timestamp, oldest gap zeroed.
    fn interval_means(&self, temps: &Frame, sensor: &str, at: DateTime<Utc>) -> Vec<f64> {
        (0..self.intervals)
            .map(|i| {
                let upto = at - self.interval * i as i32;
                let after = at - self.interval * (i + 1) as i32;
                match temps.mean_in_window(sensor, after, upto) {
                    Some(mean) => (mean - self.normalize_mean) / self.normalize_std,
                    None => 0.0,
                }
            })
            .collect()
    }

    /// Embedding columns over the result index for the target sensor.
    pub fn extract(
        &self,
        temps: &Frame,
        sensor: &str,
        index: &[DateTime<Utc>],
    ) -> PredictResult<Frame> {
        let mut columns: Vec<Vec<Option<f64>>> =
            vec![Vec::with_capacity(index.len()); self.output_width()];
        for &at in index {
            let embedding = self.model.encode(&self.interval_means(temps, sensor, at))?;
            for (col, value) in columns.iter_mut().zip(embedding) {
                col.push(Some(value));
            }
        }
        let named = columns
            .into_iter()
            .enumerate()
            .map(|(i, col)| (format!("{}{}", EMBEDDING_PREFIX, i), col))
            .collect();
        Ok(Frame::from_columns(index.to_vec(), named)?)
    }
}
