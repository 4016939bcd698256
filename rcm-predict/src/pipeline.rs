//! Prediction and post-processing pipeline
//!
//! One run covers one reactor: fetch the raw series incrementally, extract
//! features and evaluate the resolved models per sensor and horizon, merge
//! everything into a wide prediction frame, rewrite identifiers to the
//! canonical `plate:sensor[:horizon]` form, derive smoothed temperature
//! statistics, and append only rows newer than the pre-run watermark.
//! Each sensor succeeds or fails independently; all writes happen after the
//! full reactor is computed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use rcm_common::config::FeatureParams;
use rcm_common::series::Frame;
use rcm_common::time::watermark_sentinel;

use crate::error::{PredictError, PredictResult};
use crate::features::FeatureExtractor;
use crate::models::repository::ModelRepository;
use crate::store::{
    InputHandler, PredictionRow, SqlSink, TemperatureDiffRow, TemperatureRow, TemperatureStdRow,
};
use crate::topology::Reactor;

/// One reactor's batch prediction run.
pub struct Pipeline<'a> {
    reactor: &'a Reactor,
    repository: &'a ModelRepository,
    params: &'a FeatureParams,
    /// raw source column → canonical tag, for the analysis tables
    analysis_tags: &'a HashMap<String, String>,
    /// raw source column → sensor ID, for the temperature table
    temperature_tags: &'a HashMap<String, String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        reactor: &'a Reactor,
        repository: &'a ModelRepository,
        params: &'a FeatureParams,
        analysis_tags: &'a HashMap<String, String>,
        temperature_tags: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            reactor,
            repository,
            params,
            analysis_tags,
            temperature_tags,
        }
    }

    /// Execute one full incremental run.
    pub async fn run(&self, input: &InputHandler, sink: &SqlSink) -> PredictResult<()> {
        let watermark = sink.find_watermark(&sink.tables().predictions).await?;
        info!(reactor = self.reactor.name(), %watermark, "Starting prediction run");

        // trailing history margins so windowed features near the watermark
        // have enough points; the write-side (watermark, last_new] filter
        // keeps the margin from duplicating rows
        let fresh_start = watermark == watermark_sentinel();
        let since_temperatures =
            (!fresh_start).then(|| watermark - self.params.temperature_history());
        let since_analysis = (!fresh_start).then(|| watermark - self.params.analysis_history());

        let raw_temps = input.fetch_temperatures(since_temperatures).await?;
        let raw_analysis = input.fetch_analysis(since_analysis).await?;
        if raw_analysis.is_empty() {
            info!(reactor = self.reactor.name(), "No new analysis samples, nothing to do");
            return Ok(());
        }

        let temps = preprocess(&raw_temps, self.temperature_tags)?;
        let analysis = preprocess(&raw_analysis, self.analysis_tags)?.interpolate();
        debug!(
            temperature_rows = temps.len(),
            analysis_rows = analysis.len(),
            "Preprocessed input series"
        );

        let predictions = self.predict_all_sensors(&temps, &analysis)?;
        if predictions.is_empty() {
            info!(reactor = self.reactor.name(), "No predictions produced");
            return Ok(());
        }

        // canonical identifiers, then trailing smoothing before persistence
        let mut predictions = predictions;
        let mapping = self.canonical_names(predictions.column_names())?;
        predictions.rename(&mapping);
        let smoothed = predictions.rolling_mean(self.params.prediction_smoothing());

        let new_predictions = smoothed.between(Some(watermark), None);
        let Some(last_new) = new_predictions.last_timestamp() else {
            info!(
                reactor = self.reactor.name(),
                "All predictions at or before the watermark, zero writes"
            );
            return Ok(());
        };

        let prediction_rows = format_predictions(&new_predictions);
        if prediction_rows.is_empty() {
            // nothing advances the predictions watermark, so writing the
            // statistics would re-append them on every subsequent run
            info!(
                reactor = self.reactor.name(),
                "No new prediction rows, zero writes"
            );
            return Ok(());
        }
        let statistics = self.derive_statistics(&temps, watermark, last_new)?;

        sink.write_predictions(&prediction_rows).await?;
        sink.write_temperatures(&statistics.temperatures).await?;
        sink.write_temperature_diffs(&statistics.diffs).await?;
        sink.write_temperature_stds(&statistics.stds).await?;
        info!(
            reactor = self.reactor.name(),
            predictions = prediction_rows.len(),
            %last_new,
            "Run complete"
        );
        Ok(())
    }

    /// Per-sensor feature extraction and model evaluation, outer-merged into
    /// one wide frame of `sensor:horizon` probability columns.
    fn predict_all_sensors(&self, temps: &Frame, analysis: &Frame) -> PredictResult<Frame> {
        let reactor_name = self.reactor.name();
        let mut merged = Frame::new();
        for sensor in self.reactor.all_sensors() {
            let horizon_models = match self.repository.prediction(reactor_name, &sensor) {
                Ok(models) => models,
                Err(PredictError::MissingModel { .. }) => {
                    warn!(sensor, "No prediction model at any level, sensor skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let encoder = optional_model(self.repository.encoder(reactor_name, &sensor))?;
            let trend = optional_model(self.repository.trend(reactor_name, &sensor))?;

            let extractor = FeatureExtractor::new(self.reactor, self.params, encoder, trend)?;
            let features = extractor.extract(temps, analysis, &sensor)?;
            let (index, rows) = complete_rows(&features);
            debug!(
                sensor,
                feature_rows = index.len(),
                skipped = features.len() - index.len(),
                "Extracted features"
            );

            let mut columns = Vec::new();
            for (horizon, model) in horizon_models.iter() {
                let probabilities = rows
                    .iter()
                    .map(|row| model.predict_proba(row).map(Some))
                    .collect::<PredictResult<Vec<_>>>()?;
                columns.push((format!("{}:{}", sensor, horizon), probabilities));
            }
            let sensor_frame = Frame::from_columns(index, columns)?;
            merged = merged.outer_join(&sensor_frame)?;
        }
        Ok(merged)
    }

    /// Map `sensor` / `sensor:horizon` column names to `plate:sensor[:horizon]`.
    fn canonical_names(&self, names: &[String]) -> PredictResult<HashMap<String, String>> {
        let mut mapping = HashMap::new();
        for name in names {
            let sensor = name.split(':').next().unwrap_or(name);
            let plate = self.reactor.find_plate(sensor)?;
            mapping.insert(name.clone(), format!("{}:{}", plate.name(), name));
        }
        Ok(mapping)
    }

    /// Smoothed, subsampled temperature statistics over `(watermark, last_new]`.
    fn derive_statistics(
        &self,
        temps: &Frame,
        watermark: DateTime<Utc>,
        last_new: DateTime<Utc>,
    ) -> PredictResult<Statistics> {
        let bounds = (Some(watermark), Some(last_new));
        let smoothed = temps
            .rolling_mean(self.params.statistics_smoothing())
            .subsample_minutes(self.params.statistics_subsample_minutes);

        let mut temperatures = Vec::new();
        let headline = smoothed.between(bounds.0, bounds.1);
        for sensor in self.reactor.all_sensors() {
            let plate = self.reactor.find_plate(&sensor)?.name().to_string();
            if let Some(values) = headline.column(&sensor) {
                for (row, value) in values.iter().enumerate() {
                    if let Some(temperature) = value {
                        temperatures.push(TemperatureRow {
                            timestamp: headline.index()[row],
                            plate: plate.clone(),
                            sensor: sensor.clone(),
                            temperature: *temperature,
                        });
                    }
                }
            }
        }

        // mean-temperature difference of each vertically adjacent plate pair
        let mut diffs = Vec::new();
        for pair in self.reactor.plates().windows(2) {
            let (above, below) = (&pair[0], &pair[1]);
            let above_cols = present_columns(&headline, above.sensors());
            let below_cols = present_columns(&headline, below.sensors());
            let above_means = headline.row_mean(&above_cols)?;
            let below_means = headline.row_mean(&below_cols)?;
            let label = format!("{} - {}", above.name(), below.name());
            for (row, (a, b)) in above_means.iter().zip(&below_means).enumerate() {
                if let (Some(a), Some(b)) = (a, b) {
                    diffs.push(TemperatureDiffRow {
                        timestamp: headline.index()[row],
                        plates: label.clone(),
                        difference: a - b,
                    });
                }
            }
        }

        let mut stds = Vec::new();
        // per-plate spread across its sensors at each instant
        for plate in self.reactor.plates() {
            let cols = present_columns(&headline, plate.sensors());
            for (row, value) in headline.row_std(&cols)?.iter().enumerate() {
                if let Some(std_dev) = value {
                    stds.push(TemperatureStdRow {
                        timestamp: headline.index()[row],
                        plate: plate.name().to_string(),
                        sensor: None,
                        std_dev: *std_dev,
                    });
                }
            }
        }
        // per-sensor rolling std over the full fetched history, so the first
        // subsampled point after the watermark is not artificially truncated
        let sensor_std = temps
            .rolling_std(self.params.sensor_std_window())
            .subsample_minutes(self.params.statistics_subsample_minutes)
            .between(bounds.0, bounds.1);
        for sensor in self.reactor.all_sensors() {
            let plate = self.reactor.find_plate(&sensor)?.name().to_string();
            if let Some(values) = sensor_std.column(&sensor) {
                for (row, value) in values.iter().enumerate() {
                    if let Some(std_dev) = value {
                        stds.push(TemperatureStdRow {
                            timestamp: sensor_std.index()[row],
                            plate: plate.clone(),
                            sensor: Some(sensor.clone()),
                            std_dev: *std_dev,
                        });
                    }
                }
            }
        }

        Ok(Statistics {
            temperatures,
            diffs,
            stds,
        })
    }
}

struct Statistics {
    temperatures: Vec<TemperatureRow>,
    diffs: Vec<TemperatureDiffRow>,
    stds: Vec<TemperatureStdRow>,
}

/// Select and rename raw source columns through a tag dictionary, dropping
/// rows where every tag is missing. Columns are ordered by canonical name so
/// the feature layout is deterministic.
fn preprocess(raw: &Frame, tags: &HashMap<String, String>) -> PredictResult<Frame> {
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort_by(|a, b| a.1.cmp(b.1));
    let raw_names: Vec<String> = pairs.iter().map(|(raw, _)| (*raw).clone()).collect();
    let mut selected = raw.select(&raw_names)?;
    selected.rename(
        &pairs
            .into_iter()
            .map(|(raw, canonical)| (raw.clone(), canonical.clone()))
            .collect(),
    );
    Ok(selected.drop_all_missing_rows())
}

fn optional_model<M>(resolved: PredictResult<M>) -> PredictResult<Option<M>> {
    match resolved {
        Ok(model) => Ok(Some(model)),
        Err(PredictError::MissingModel { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Rows of the feature frame where every feature is present, as dense rows.
fn complete_rows(features: &Frame) -> (Vec<DateTime<Utc>>, Vec<Vec<f64>>) {
    let mut index = Vec::new();
    let mut rows = Vec::new();
    for (row, &ts) in features.index().iter().enumerate() {
        let dense: Option<Vec<f64>> = features
            .column_names()
            .iter()
            .map(|name| features.get(row, name))
            .collect();
        if let Some(dense) = dense {
            index.push(ts);
            rows.push(dense);
        }
    }
    (index, rows)
}

/// Long-format records from a `plate:sensor:horizon` wide frame.
fn format_predictions(frame: &Frame) -> Vec<PredictionRow> {
    let mut out = Vec::new();
    for name in frame.column_names() {
        let mut parts = name.splitn(3, ':');
        let (Some(plate), Some(sensor), Some(horizon)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if let Some(values) = frame.column(name) {
            for (row, value) in values.iter().enumerate() {
                if let Some(probability) = value {
                    out.push(PredictionRow {
                        timestamp: frame.index()[row],
                        plate: plate.to_string(),
                        sensor: sensor.to_string(),
                        horizon: horizon.to_string(),
                        probability: *probability,
                    });
                }
            }
        }
    }
    out
}

fn present_columns(frame: &Frame, sensors: Vec<&str>) -> Vec<String> {
    sensors
        .into_iter()
        .filter(|s| frame.has_column(s))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_complete_rows_drops_partial() {
        let ts0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let ts1 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let frame = Frame::from_columns(
            vec![ts0, ts1],
            vec![
                ("a".to_string(), vec![None, Some(1.0)]),
                ("b".to_string(), vec![Some(2.0), Some(3.0)]),
            ],
        )
        .unwrap();
        let (index, rows) = complete_rows(&frame);
        assert_eq!(index, vec![ts1]);
        assert_eq!(rows, vec![vec![1.0, 3.0]]);
    }

    #[test]
    fn test_format_predictions_splits_labels() {
        let ts0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let frame = Frame::from_columns(
            vec![ts0],
            vec![("9:T911:24h".to_string(), vec![Some(0.75)])],
        )
        .unwrap();
        let rows = format_predictions(&frame);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plate, "9");
        assert_eq!(rows[0].sensor, "T911");
        assert_eq!(rows[0].horizon, "24h");
        assert!((rows[0].probability - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_preprocess_selects_renames_and_sorts() {
        let ts0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let ts1 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let raw = Frame::from_columns(
            vec![ts0, ts1],
            vec![
                ("x_raw".to_string(), vec![Some(1.0), None]),
                ("a_raw".to_string(), vec![Some(2.0), None]),
                ("ignored".to_string(), vec![Some(9.0), Some(9.0)]),
            ],
        )
        .unwrap();
        let tags = HashMap::from([
            ("x_raw".to_string(), "beta".to_string()),
            ("a_raw".to_string(), "alpha".to_string()),
        ]);
        let out = preprocess(&raw, &tags).unwrap();
        assert_eq!(out.column_names(), &["alpha", "beta"]);
        // second row had no tagged values at all
        assert_eq!(out.len(), 1);
    }
}
