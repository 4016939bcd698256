//! Linear trend features
//!
//! For each tracked chemical-analysis tag and each timestamp where the tag
//! has an observation, an ordinary-least-squares line is fit over the tag's
//! own observations within a trailing window. `x` is elapsed hours since the
//! first observation inside the window; the fit needs at least two points.
//! Timestamps without a fit stay missing and are outer-joined back onto the
//! common index.

use std::sync::Arc;

use chrono::Duration;

use rcm_common::series::Frame;
use rcm_common::time::hours_between;

use crate::error::{PredictError, PredictResult};
use crate::models::TrendSpec;

/// Suffixes of the per-tag trend columns.
pub const COEF_SUFFIX: &str = "_coef";
pub const INTERCEPT_SUFFIX: &str = "_intercept";

/// OLS fit `y = coef * x + intercept`; `None` for fewer than two points
/// or a degenerate (zero-variance) abscissa.
pub fn ols_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n_f;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n_f;
    let ss_xx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if ss_xx == 0.0 {
        return None;
    }
    let ss_xy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let coef = ss_xy / ss_xx;
    Some((coef, mean_y - coef * mean_x))
}

/// Sliding-window trend extractor for a fixed tag list.
pub struct TrendExtractor {
    window: Duration,
    spec: Arc<TrendSpec>,
}

impl TrendExtractor {
    pub fn new(window: Duration, spec: Arc<TrendSpec>) -> Self {
        Self { window, spec }
    }

    pub fn tags(&self) -> &[String] {
        &self.spec.tags
    }

    /// `<tag>_coef` / `<tag>_intercept` columns over the analysis index.
    ///
    /// Fails with `MissingTags` if any tracked tag is absent from the input.
    pub fn extract(&self, analysis: &Frame) -> PredictResult<Frame> {
        let missing: Vec<String> = self
            .spec
            .tags
            .iter()
            .filter(|tag| !analysis.has_column(tag))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PredictError::MissingTags(missing));
        }

        let index = analysis.index().to_vec();
        let mut columns = Vec::with_capacity(self.spec.tags.len() * 2);
        for tag in &self.spec.tags {
            let values = analysis
                .column(tag)
                .ok_or_else(|| PredictError::MissingTags(vec![tag.clone()]))?;
            // the tag's own observation stream; other rows of the joined
            // analysis frame do not participate in this tag's fit
            let observations: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .filter_map(|(row, v)| v.map(|v| (row, v)))
                .collect();

            let mut coefs = vec![None; index.len()];
            let mut intercepts = vec![None; index.len()];
            for (pos, &(row, _)) in observations.iter().enumerate() {
                let at = index[row];
                let window_start = observations[..=pos]
                    .iter()
                    .position(|&(r, _)| index[r] >= at - self.window)
                    .unwrap_or(pos);
                let in_window = &observations[window_start..=pos];
                if in_window.len() < 2 {
                    continue;
                }
                let origin = index[in_window[0].0];
                let points: Vec<(f64, f64)> = in_window
                    .iter()
                    .map(|&(r, y)| (hours_between(origin, index[r]), y))
                    .collect();
                if let Some((coef, intercept)) = ols_fit(&points) {
                    coefs[row] = Some(coef);
                    intercepts[row] = Some(intercept);
                }
            }
            columns.push((format!("{}{}", tag, COEF_SUFFIX), coefs));
            columns.push((format!("{}{}", tag, INTERCEPT_SUFFIX), intercepts));
        }
        Ok(Frame::from_columns(index, columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_ols_recovers_known_line() {
        // y = 2.5x - 1, no noise
        let points: Vec<(f64, f64)> = (0..10)
            .map(|i| {
                let x = i as f64;
                (x, 2.5 * x - 1.0)
            })
            .collect();
        let (coef, intercept) = ols_fit(&points).unwrap();
        assert!((coef - 2.5).abs() < 1e-9);
        assert!((intercept + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ols_degenerate_cases() {
        assert!(ols_fit(&[(0.0, 1.0)]).is_none());
        assert!(ols_fit(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }

    #[test]
    fn test_missing_tag_is_fatal() {
        let frame = Frame::from_columns(
            vec![ts(1)],
            vec![("hydrogen_pct".to_string(), vec![Some(1.0)])],
        )
        .unwrap();
        let extractor = TrendExtractor::new(
            Duration::hours(48),
            Arc::new(TrendSpec {
                tags: vec!["hydrogen_pct".to_string(), "methane_pct".to_string()],
            }),
        );
        match extractor.extract(&frame) {
            Err(PredictError::MissingTags(tags)) => assert_eq!(tags, vec!["methane_pct"]),
            other => panic!("expected MissingTags, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_window_limits_fit_and_sparse_rows_skipped() {
        // daily samples; a 48h window holds at most 3 of them
        let index: Vec<_> = (1..=5).map(ts).collect();
        let values: Vec<Option<f64>> = (1..=5).map(|d| Some(d as f64 * 10.0)).collect();
        let frame = Frame::from_columns(
            index,
            vec![("hydrogen_pct".to_string(), values)],
        )
        .unwrap();
        let extractor = TrendExtractor::new(
            Duration::hours(48),
            Arc::new(TrendSpec {
                tags: vec!["hydrogen_pct".to_string()],
            }),
        );
        let trends = extractor.extract(&frame).unwrap();

        // first sample has a single point in its window: no fit
        assert!(trends.get(0, "hydrogen_pct_coef").is_none());
        // the series is linear at 10 units/day, so every fit recovers it
        for row in 1..5 {
            let coef = trends.get(row, "hydrogen_pct_coef").unwrap();
            assert!((coef - 10.0 / 24.0).abs() < 1e-9, "row {}: {}", row, coef);
        }
        // intercept is the value at the window's first observation
        let intercept = trends.get(1, "hydrogen_pct_intercept").unwrap();
        assert!((intercept - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_gaps_in_tag_do_not_fit_through_missing() {
        let index: Vec<_> = (1..=3).map(ts).collect();
        let frame = Frame::from_columns(
            index,
            vec![(
                "hydrogen_pct".to_string(),
                vec![Some(1.0), None, Some(3.0)],
            )],
        )
        .unwrap();
        let extractor = TrendExtractor::new(
            Duration::hours(48),
            Arc::new(TrendSpec {
                tags: vec!["hydrogen_pct".to_string()],
            }),
        );
        let trends = extractor.extract(&frame).unwrap();
        // no output where the tag itself has no observation
        assert!(trends.get(1, "hydrogen_pct_coef").is_none());
        // day 3's window reaches back to day 1's observation
        assert!(trends.get(2, "hydrogen_pct_coef").is_some());
    }
}
