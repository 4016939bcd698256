//! Configuration loading
//!
//! One TOML file describes everything a run needs: source and sink
//! connections with their logical table names, the reactor topology
//! (plate stack and angular sensor slots), per-reactor tag dictionaries
//! mapping raw source columns to canonical names, feature-extraction
//! parameters, and the model artifact directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Number of angular sensor slots on every plate (0°, 90°, 180°, 270°).
pub const ANGLE_SLOTS: usize = 4;

/// Top-level settings document.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub features: FeatureParams,
    pub reactors: Vec<ReactorConfig>,
    pub tags: TagDictionaries,
}

/// Relational source connection and its four logical input tables.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub database_url: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    pub tables: InputTables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputTables {
    pub catalyst_analysis: String,
    pub out_gas_analysis: String,
    pub smoke_gas_analysis: String,
    pub temperatures: String,
}

impl InputTables {
    /// The sparse, irregular analysis tables that get outer-joined.
    pub fn analysis(&self) -> [&str; 3] {
        [
            &self.catalyst_analysis,
            &self.out_gas_analysis,
            &self.smoke_gas_analysis,
        ]
    }
}

/// Relational sink connection and its four logical output tables.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub database_url: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    pub tables: OutputTables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputTables {
    pub predictions: String,
    pub temperatures: String,
    pub temperature_diffs: String,
    pub temperature_stds: String,
}

/// Model artifact store location.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub artifact_dir: PathBuf,
}

/// Feature-extraction and post-processing parameters with domain defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Look-back for windowed mean temperatures (hours).
    pub mean_window_hours: i64,
    /// Trailing window for OLS trend fits (hours).
    pub trend_window_hours: i64,
    /// Trailing window partitioned into encoder sub-intervals (hours).
    pub encoder_period_hours: i64,
    /// Number of encoder input sub-intervals.
    pub encoder_intervals: usize,
    /// Width of the encoder embedding.
    pub encoder_outputs: usize,
    /// Global normalization mean for encoder inputs.
    pub normalize_mean: f64,
    /// Global normalization standard deviation for encoder inputs.
    pub normalize_std: f64,
    /// Tags whose raw value is dropped from the feature row
    /// (their trend coefficients are still emitted).
    pub excluded_raw_tags: Vec<String>,
    /// Trailing rolling-mean window applied to predictions before writing (hours).
    pub prediction_smoothing_hours: i64,
    /// Rolling-mean window for derived temperature statistics (minutes).
    pub statistics_smoothing_minutes: i64,
    /// Statistics are subsampled to every Nth minute boundary.
    pub statistics_subsample_minutes: u32,
    /// Window for the per-sensor rolling standard deviation (hours).
    pub sensor_std_window_hours: i64,
    /// Extra temperature history fetched before the watermark (days).
    pub temperature_history_days: i64,
    /// Extra analysis history fetched before the watermark (days), so the
    /// trend window of the newest samples has enough points.
    pub analysis_history_days: i64,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            mean_window_hours: 12,
            trend_window_hours: 48,
            encoder_period_hours: 48,
            encoder_intervals: 20,
            encoder_outputs: 5,
            normalize_mean: 500.0,
            normalize_std: 100.0,
            excluded_raw_tags: Vec::new(),
            prediction_smoothing_hours: 48,
            statistics_smoothing_minutes: 10,
            statistics_subsample_minutes: 10,
            sensor_std_window_hours: 6,
            temperature_history_days: 4,
            analysis_history_days: 4,
        }
    }
}

impl FeatureParams {
    pub fn mean_window(&self) -> Duration {
        Duration::hours(self.mean_window_hours)
    }

    pub fn trend_window(&self) -> Duration {
        Duration::hours(self.trend_window_hours)
    }

    pub fn encoder_period(&self) -> Duration {
        Duration::hours(self.encoder_period_hours)
    }

    pub fn prediction_smoothing(&self) -> Duration {
        Duration::hours(self.prediction_smoothing_hours)
    }

    pub fn statistics_smoothing(&self) -> Duration {
        Duration::minutes(self.statistics_smoothing_minutes)
    }

    pub fn sensor_std_window(&self) -> Duration {
        Duration::hours(self.sensor_std_window_hours)
    }

    pub fn temperature_history(&self) -> Duration {
        Duration::days(self.temperature_history_days)
    }

    pub fn analysis_history(&self) -> Duration {
        Duration::days(self.analysis_history_days)
    }
}

/// Static topology of one reactor: its plate stack, top to bottom.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactorConfig {
    pub name: String,
    pub plates: Vec<PlateConfig>,
}

/// One plate: a fixed array of angular slots, empty string = vacant slot.
#[derive(Debug, Clone, Deserialize)]
pub struct PlateConfig {
    pub name: String,
    pub slots: Vec<String>,
}

/// Per-reactor dictionaries mapping raw source column names to canonical ones.
#[derive(Debug, Clone, Deserialize)]
pub struct TagDictionaries {
    pub analysis: HashMap<String, HashMap<String, String>>,
    pub temperatures: HashMap<String, HashMap<String, String>>,
}

impl TagDictionaries {
    pub fn analysis_for(&self, reactor: &str) -> Result<&HashMap<String, String>> {
        self.analysis
            .get(reactor)
            .ok_or_else(|| Error::Config(format!("no analysis tags for reactor {}", reactor)))
    }

    pub fn temperatures_for(&self, reactor: &str) -> Result<&HashMap<String, String>> {
        self.temperatures
            .get(reactor)
            .ok_or_else(|| Error::Config(format!("no temperature tags for reactor {}", reactor)))
    }
}

fn default_timestamp_column() -> String {
    "ts".to_string()
}

impl Settings {
    /// Load and validate settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.reactors.is_empty() {
            return Err(Error::Config("no reactors configured".to_string()));
        }
        if self.features.statistics_subsample_minutes == 0 {
            // a zero interval matches no minute boundary and would silently
            // empty every derived statistics table
            return Err(Error::Config(
                "statistics_subsample_minutes must be at least 1".to_string(),
            ));
        }
        for reactor in &self.reactors {
            if reactor.plates.is_empty() {
                return Err(Error::Config(format!(
                    "reactor {} has no plates",
                    reactor.name
                )));
            }
            for plate in &reactor.plates {
                if plate.slots.len() != ANGLE_SLOTS {
                    return Err(Error::Config(format!(
                        "plate {} of reactor {} has {} slots, expected {}",
                        plate.name,
                        reactor.name,
                        plate.slots.len(),
                        ANGLE_SLOTS
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn reactor(&self, name: &str) -> Result<&ReactorConfig> {
        self.reactors
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::NotFound(format!("reactor {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[source]
database_url = "sqlite::memory:"
[source.tables]
catalyst_analysis = "cat_analysis"
out_gas_analysis = "out_gas_analysis"
smoke_gas_analysis = "smoke_gas_analysis"
temperatures = "temperatures"

[sink]
database_url = "sqlite::memory:"
[sink.tables]
predictions = "predictions"
temperatures = "out_temperatures"
temperature_diffs = "temperature_diffs"
temperature_stds = "temperature_stds"

[models]
artifact_dir = "models"

[features]
mean_window_hours = 6

[[reactors]]
name = "R-301"
[[reactors.plates]]
name = "9"
slots = ["T911", "T912", "", "T914"]
[[reactors.plates]]
name = "8"
slots = ["T811", "T812", "T813", "T814"]

[tags.analysis.R-301]
"raw_h2" = "hydrogen_pct"
[tags.temperatures.R-301]
"raw_t811" = "T811"
"#;

    #[test]
    fn test_load_sample() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.reactors.len(), 1);
        assert_eq!(settings.reactor("R-301").unwrap().plates[0].name, "9");
        assert!(settings.reactor("R-999").is_err());
        // explicit override applies, everything else keeps its default
        assert_eq!(settings.features.mean_window_hours, 6);
        assert_eq!(settings.features.encoder_intervals, 20);
        assert_eq!(
            settings.tags.analysis_for("R-301").unwrap()["raw_h2"],
            "hydrogen_pct"
        );
        assert!(settings.tags.analysis_for("R-302").is_err());
    }

    #[test]
    fn test_zero_subsample_interval_rejected() {
        let broken = SAMPLE.replace(
            "mean_window_hours = 6",
            "mean_window_hours = 6\nstatistics_subsample_minutes = 0",
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(broken.as_bytes()).unwrap();
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn test_bad_slot_count_rejected() {
        let broken = SAMPLE.replace(
            "slots = [\"T911\", \"T912\", \"\", \"T914\"]",
            "slots = [\"T911\", \"T912\"]",
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(broken.as_bytes()).unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
