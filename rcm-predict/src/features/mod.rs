//! Feature extraction engine
//!
//! Produces one feature row per chemical-analysis timestamp for a target
//! sensor: raw analysis values, per-tag trend coefficients, the windowed
//! temperature embedding, elapsed run duration, cross-plate temperature
//! deltas, and the angular position encoding. An absent encoder or trend
//! model skips its feature group with a warning instead of failing, so a
//! reactor can run with partial feature coverage.

pub mod encoder;
pub mod trend;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use rcm_common::config::FeatureParams;
use rcm_common::series::{mean, Frame};
use rcm_common::time::hours_between;

use crate::error::PredictResult;
use crate::models::{Encode, TrendSpec};
use crate::topology::{Plate, Reactor, ANGLES};

use self::encoder::WindowedEncoder;
use self::trend::TrendExtractor;

pub const DURATION_COLUMN: &str = "duration_hours";
pub const DELTA_ABOVE_COLUMN: &str = "delta_above";
pub const DELTA_BELOW_COLUMN: &str = "delta_below";

pub fn angle_column(angle: u16) -> String {
    format!("angle_{}", angle)
}

/// Per-sensor feature extractor over the reactor's raw series.
pub struct FeatureExtractor<'a> {
    reactor: &'a Reactor,
    params: &'a FeatureParams,
    encoder: Option<WindowedEncoder>,
    trend: Option<TrendExtractor>,
}

impl<'a> FeatureExtractor<'a> {
    /// Wire up the optional sub-extractors for one sensor's resolved models.
    ///
    /// A `None` model degrades the feature set and is reported once here;
    /// an encoder whose window partition is invalid fails construction.
    pub fn new(
        reactor: &'a Reactor,
        params: &'a FeatureParams,
        encoder_model: Option<Arc<dyn Encode>>,
        trend_spec: Option<Arc<TrendSpec>>,
    ) -> PredictResult<Self> {
        let encoder = match encoder_model {
            Some(model) => Some(WindowedEncoder::new(params, model)?),
            None => {
                warn!(
                    reactor = reactor.name(),
                    component = "encoder",
                    "missing feature component, temperature embedding skipped"
                );
                None
            }
        };
        let trend = match trend_spec {
            Some(spec) => Some(TrendExtractor::new(params.trend_window(), spec)),
            None => {
                warn!(
                    reactor = reactor.name(),
                    component = "trend",
                    "missing feature component, trend features skipped"
                );
                None
            }
        };
        Ok(Self {
            reactor,
            params,
            encoder,
            trend,
        })
    }

    /// One feature row per analysis timestamp for the target sensor.
    pub fn extract(
        &self,
        temps: &Frame,
        analysis: &Frame,
        sensor_id: &str,
    ) -> PredictResult<Frame> {
        let plate = self.reactor.find_plate(sensor_id)?;
        let index = analysis.index().to_vec();

        let trend_frame = match &self.trend {
            Some(trend) => Some(trend.extract(analysis)?),
            None => None,
        };
        let embedding_frame = match &self.encoder {
            Some(encoder) => Some(encoder.extract(temps, sensor_id, &index)?),
            None => None,
        };

        let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        let copy_from = |frame: &Frame, name: &str| -> Vec<Option<f64>> {
            frame
                .column(name)
                .map(<[Option<f64>]>::to_vec)
                .unwrap_or_else(|| vec![None; index.len()])
        };

        // raw analysis values interleaved with their trend coefficients
        for tag in analysis.column_names() {
            if !self.params.excluded_raw_tags.contains(tag) {
                columns.push((tag.clone(), copy_from(analysis, tag)));
            }
            if let Some(trends) = &trend_frame {
                let coef = format!("{}{}", tag, trend::COEF_SUFFIX);
                if trends.has_column(&coef) {
                    columns.push((coef.clone(), copy_from(trends, &coef)));
                    let intercept = format!("{}{}", tag, trend::INTERCEPT_SUFFIX);
                    columns.push((intercept.clone(), copy_from(trends, &intercept)));
                }
            }
        }

        if let Some(embeddings) = &embedding_frame {
            for name in embeddings.column_names() {
                columns.push((name.clone(), copy_from(embeddings, name)));
            }
        }

        let first = index.first().copied();
        columns.push((
            DURATION_COLUMN.to_string(),
            index
                .iter()
                .map(|&at| first.map(|start| hours_between(start, at)))
                .collect(),
        ));

        let above = self.reactor.plate_above(plate.name())?;
        let below = self.reactor.plate_below(plate.name())?;
        columns.push((
            DELTA_ABOVE_COLUMN.to_string(),
            self.plate_deltas(temps, sensor_id, above, &index),
        ));
        columns.push((
            DELTA_BELOW_COLUMN.to_string(),
            self.plate_deltas(temps, sensor_id, below, &index),
        ));

        let one_hot = self.reactor.angle_vector(plate.name(), sensor_id)?;
        for (angle, &flag) in ANGLES.iter().zip(one_hot.iter()) {
            columns.push((angle_column(*angle), vec![Some(flag); index.len()]));
        }

        Ok(Frame::from_columns(index, columns)?)
    }

    /// Difference between a neighbor plate's mean windowed temperature and
    /// the target sensor's. Exactly zero at the stack boundary so the
    /// feature vector keeps a fixed width on edge plates.
    fn plate_deltas(
        &self,
        temps: &Frame,
        sensor_id: &str,
        neighbor: Option<&Plate>,
        index: &[DateTime<Utc>],
    ) -> Vec<Option<f64>> {
        let Some(neighbor) = neighbor else {
            return vec![Some(0.0); index.len()];
        };
        let window = self.params.mean_window();
        index
            .iter()
            .map(|&at| {
                let own = temps.mean_in_window(sensor_id, at - window, at)?;
                let neighbor_mean = mean(
                    neighbor
                        .sensors()
                        .iter()
                        .map(|s| temps.mean_in_window(s, at - window, at)),
                )?;
                Some(neighbor_mean - own)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rcm_common::config::{PlateConfig, ReactorConfig};

    use crate::models::DenseEncoder;

    fn reactor() -> Reactor {
        Reactor::from_config(&ReactorConfig {
            name: "R-301".to_string(),
            plates: vec![
                PlateConfig {
                    name: "9".to_string(),
                    slots: vec!["T911".into(), "T912".into(), "".into(), "".into()],
                },
                PlateConfig {
                    name: "8".to_string(),
                    slots: vec!["T811".into(), "T812".into(), "".into(), "".into()],
                },
            ],
        })
        .unwrap()
    }

    fn params() -> FeatureParams {
        FeatureParams {
            encoder_period_hours: 4,
            encoder_intervals: 2,
            encoder_outputs: 1,
            ..FeatureParams::default()
        }
    }

    /// Hourly temperatures for 10 days: top plate at 500, bottom at 520.
    fn temps(start: DateTime<Utc>) -> Frame {
        let index: Vec<_> = (0..240).map(|h| start + Duration::hours(h)).collect();
        let n = index.len();
        Frame::from_columns(
            index,
            vec![
                ("T911".to_string(), vec![Some(500.0); n]),
                ("T912".to_string(), vec![Some(500.0); n]),
                ("T811".to_string(), vec![Some(520.0); n]),
                ("T812".to_string(), vec![Some(520.0); n]),
            ],
        )
        .unwrap()
    }

    fn analysis(start: DateTime<Utc>) -> Frame {
        let index: Vec<_> = (1..=9).map(|d| start + Duration::days(d)).collect();
        let values: Vec<Option<f64>> = (1..=9).map(|d| Some(d as f64)).collect();
        Frame::from_columns(index, vec![("hydrogen_pct".to_string(), values)]).unwrap()
    }

    fn extractor_parts() -> (Arc<dyn Encode>, Arc<TrendSpec>) {
        let encoder = DenseEncoder::new(vec![vec![0.5, 0.5]], vec![0.0]).unwrap();
        let spec = TrendSpec {
            tags: vec!["hydrogen_pct".to_string()],
        };
        (Arc::new(encoder), Arc::new(spec))
    }

    #[test]
    fn test_feature_columns_in_fixed_order() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let reactor = reactor();
        let p = params();
        let (encode, spec) = extractor_parts();
        let extractor =
            FeatureExtractor::new(&reactor, &p, Some(encode), Some(spec)).unwrap();
        let features = extractor
            .extract(&temps(start), &analysis(start), "T911")
            .unwrap();

        assert_eq!(
            features.column_names(),
            &[
                "hydrogen_pct",
                "hydrogen_pct_coef",
                "hydrogen_pct_intercept",
                "temp_embed_0",
                "duration_hours",
                "delta_above",
                "delta_below",
                "angle_0",
                "angle_90",
                "angle_180",
                "angle_270",
            ]
        );
        assert_eq!(features.len(), 9);
    }

    #[test]
    fn test_delta_zero_at_top_plate_and_signed_below() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let reactor = reactor();
        let p = params();
        let (encode, spec) = extractor_parts();
        let extractor =
            FeatureExtractor::new(&reactor, &p, Some(encode), Some(spec)).unwrap();
        let features = extractor
            .extract(&temps(start), &analysis(start), "T911")
            .unwrap();

        for row in 0..features.len() {
            assert_eq!(features.get(row, "delta_above"), Some(0.0));
            // plate below runs 20 degrees hotter
            let below = features.get(row, "delta_below").unwrap();
            assert!((below - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_duration_and_position_encoding() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let reactor = reactor();
        let p = params();
        let (encode, spec) = extractor_parts();
        let extractor =
            FeatureExtractor::new(&reactor, &p, Some(encode), Some(spec)).unwrap();
        let features = extractor
            .extract(&temps(start), &analysis(start), "T912")
            .unwrap();

        assert_eq!(features.get(0, "duration_hours"), Some(0.0));
        assert_eq!(features.get(1, "duration_hours"), Some(24.0));
        assert_eq!(features.get(0, "angle_0"), Some(0.0));
        assert_eq!(features.get(0, "angle_90"), Some(1.0));
    }

    #[test]
    fn test_absent_components_skip_feature_groups() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let reactor = reactor();
        let p = params();
        let extractor = FeatureExtractor::new(&reactor, &p, None, None).unwrap();
        let features = extractor
            .extract(&temps(start), &analysis(start), "T911")
            .unwrap();

        assert!(!features.has_column("temp_embed_0"));
        assert!(!features.has_column("hydrogen_pct_coef"));
        assert!(features.has_column("hydrogen_pct"));
        assert!(features.has_column("delta_below"));
    }

    #[test]
    fn test_excluded_raw_tag_keeps_trend_columns() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let reactor = reactor();
        let p = FeatureParams {
            excluded_raw_tags: vec!["hydrogen_pct".to_string()],
            ..params()
        };
        let (encode, spec) = extractor_parts();
        let extractor =
            FeatureExtractor::new(&reactor, &p, Some(encode), Some(spec)).unwrap();
        let features = extractor
            .extract(&temps(start), &analysis(start), "T911")
            .unwrap();

        assert!(!features.has_column("hydrogen_pct"));
        assert!(features.has_column("hydrogen_pct_coef"));
        assert!(features.has_column("hydrogen_pct_intercept"));
    }
}
