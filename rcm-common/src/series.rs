//! Time-indexed series frame
//!
//! A `Frame` is the in-memory shape of every table the monitor touches:
//! a sorted, unique UTC timestamp index plus named columns of optional
//! readings (a reading is absent when the source had no row, the sensor
//! was offline, or an outer join left a gap).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::time::on_minute_boundary;

/// Column-major frame of `Option<f64>` readings over a shared timestamp index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    index: Vec<DateTime<Utc>>,
    columns: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
}

impl Frame {
    /// Empty frame: no rows, no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from an index and named columns.
    ///
    /// Rows are sorted by timestamp. Duplicate timestamps or mismatched
    /// column lengths are rejected.
    pub fn from_columns(
        index: Vec<DateTime<Utc>>,
        columns: Vec<(String, Vec<Option<f64>>)>,
    ) -> Result<Self> {
        for (name, values) in &columns {
            if values.len() != index.len() {
                return Err(Error::InvalidInput(format!(
                    "column {} has {} values for {} index entries",
                    name,
                    values.len(),
                    index.len()
                )));
            }
        }
        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by_key(|&i| index[i]);
        for pair in order.windows(2) {
            if index[pair[0]] == index[pair[1]] {
                return Err(Error::InvalidInput(format!(
                    "duplicate timestamp {} in frame index",
                    index[pair[0]]
                )));
            }
        }
        let sorted_index: Vec<_> = order.iter().map(|&i| index[i]).collect();
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (name, col) in columns {
            if names.contains(&name) {
                return Err(Error::InvalidInput(format!("duplicate column {}", name)));
            }
            values.push(order.iter().map(|&i| col[i]).collect());
            names.push(name);
        }
        Ok(Self {
            index: sorted_index,
            columns: names,
            values,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Column values by name, aligned with `index()`.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        let pos = self.columns.iter().position(|c| c == name)?;
        Some(&self.values[pos])
    }

    /// Single cell by row position and column name.
    pub fn get(&self, row: usize, name: &str) -> Option<f64> {
        self.column(name).and_then(|col| col.get(row).copied().flatten())
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.index.last().copied()
    }

    /// Append a column aligned with the current index.
    pub fn insert_column(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.index.len() {
            return Err(Error::InvalidInput(format!(
                "column {} has {} values for {} index entries",
                name,
                values.len(),
                self.index.len()
            )));
        }
        if self.has_column(name) {
            return Err(Error::InvalidInput(format!("duplicate column {}", name)));
        }
        self.columns.push(name.to_string());
        self.values.push(values);
        Ok(())
    }

    /// Project onto the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Frame> {
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .column(name)
                .ok_or_else(|| Error::NotFound(format!("column {}", name)))?;
            values.push(col.to_vec());
        }
        Ok(Frame {
            index: self.index.clone(),
            columns: names.to_vec(),
            values,
        })
    }

    /// Rename columns in place; names absent from the map are kept.
    pub fn rename(&mut self, mapping: &HashMap<String, String>) {
        for name in &mut self.columns {
            if let Some(new) = mapping.get(name) {
                *name = new.clone();
            }
        }
    }

    /// Outer join on the timestamp index; columns of both frames side by side.
    pub fn outer_join(&self, other: &Frame) -> Result<Frame> {
        for name in &other.columns {
            if self.has_column(name) {
                return Err(Error::InvalidInput(format!(
                    "column {} present on both sides of join",
                    name
                )));
            }
        }
        let mut merged: Vec<DateTime<Utc>> =
            self.index.iter().chain(other.index.iter()).copied().collect();
        merged.sort();
        merged.dedup();

        let spread = |frame: &Frame, col: usize| -> Vec<Option<f64>> {
            let mut out = vec![None; merged.len()];
            for (row, ts) in frame.index.iter().enumerate() {
                if let Ok(pos) = merged.binary_search(ts) {
                    out[pos] = frame.values[col][row];
                }
            }
            out
        };

        let mut columns = Vec::with_capacity(self.columns.len() + other.columns.len());
        let mut values = Vec::with_capacity(columns.capacity());
        for (c, name) in self.columns.iter().enumerate() {
            columns.push(name.clone());
            values.push(spread(self, c));
        }
        for (c, name) in other.columns.iter().enumerate() {
            columns.push(name.clone());
            values.push(spread(other, c));
        }
        Ok(Frame {
            index: merged,
            columns,
            values,
        })
    }

    /// Row positions with `after < ts <= upto`; open bounds when `None`.
    fn row_range(
        &self,
        after: Option<DateTime<Utc>>,
        upto: Option<DateTime<Utc>>,
    ) -> std::ops::Range<usize> {
        let start = match after {
            Some(a) => self.index.partition_point(|ts| *ts <= a),
            None => 0,
        };
        let end = match upto {
            Some(u) => self.index.partition_point(|ts| *ts <= u),
            None => self.index.len(),
        };
        start..end.max(start)
    }

    /// Rows with `after < ts <= upto` (half-open trailing window convention).
    pub fn between(
        &self,
        after: Option<DateTime<Utc>>,
        upto: Option<DateTime<Utc>>,
    ) -> Frame {
        let range = self.row_range(after, upto);
        Frame {
            index: self.index[range.clone()].to_vec(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|col| col[range.clone()].to_vec())
                .collect(),
        }
    }

    /// Mean of the present values of `name` within `(after, upto]`.
    pub fn mean_in_window(
        &self,
        name: &str,
        after: DateTime<Utc>,
        upto: DateTime<Utc>,
    ) -> Option<f64> {
        let col = self.column(name)?;
        let range = self.row_range(Some(after), Some(upto));
        mean(col[range].iter().copied())
    }

    /// Drop rows where every column is missing.
    pub fn drop_all_missing_rows(&self) -> Frame {
        let keep: Vec<usize> = (0..self.index.len())
            .filter(|&row| self.values.iter().any(|col| col[row].is_some()))
            .collect();
        Frame {
            index: keep.iter().map(|&r| self.index[r]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|col| keep.iter().map(|&r| col[r]).collect())
                .collect(),
        }
    }

    /// Linear interpolation over time for interior gaps; trailing gaps carry
    /// the last observation forward, leading gaps stay missing.
    pub fn interpolate(&self) -> Frame {
        let mut values = self.values.clone();
        for col in &mut values {
            let mut last_seen: Option<(usize, f64)> = None;
            for row in 0..col.len() {
                match col[row] {
                    Some(v) => {
                        if let Some((prev_row, prev_v)) = last_seen {
                            if row - prev_row > 1 {
                                let t0 = self.index[prev_row];
                                let span = (self.index[row] - t0).num_seconds() as f64;
                                for gap in prev_row + 1..row {
                                    let x = (self.index[gap] - t0).num_seconds() as f64;
                                    col[gap] = Some(prev_v + (v - prev_v) * x / span);
                                }
                            }
                        }
                        last_seen = Some((row, v));
                    }
                    None => {}
                }
            }
            if let Some((last_row, last_v)) = last_seen {
                for item in col.iter_mut().skip(last_row + 1) {
                    *item = Some(last_v);
                }
            }
        }
        Frame {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values,
        }
    }

    /// Trailing rolling mean over `(t - window, t]` for every column.
    pub fn rolling_mean(&self, window: Duration) -> Frame {
        self.rolling(window, |values| mean(values.iter().copied()))
    }

    /// Trailing rolling sample standard deviation over `(t - window, t]`.
    ///
    /// At least two present values are required; otherwise the cell is missing.
    pub fn rolling_std(&self, window: Duration) -> Frame {
        self.rolling(window, |values| sample_std(values.iter().copied()))
    }

    fn rolling<F>(&self, window: Duration, stat: F) -> Frame
    where
        F: Fn(&[Option<f64>]) -> Option<f64>,
    {
        let mut values = Vec::with_capacity(self.values.len());
        for col in &self.values {
            let mut out = Vec::with_capacity(self.index.len());
            for (row, ts) in self.index.iter().enumerate() {
                let start = self.index.partition_point(|t| *t <= *ts - window);
                out.push(stat(&col[start..=row]));
            }
            values.push(out);
        }
        Frame {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values,
        }
    }

    /// Keep only rows landing exactly on an `every_minutes` minute boundary.
    pub fn subsample_minutes(&self, every_minutes: u32) -> Frame {
        let keep: Vec<usize> = (0..self.index.len())
            .filter(|&row| on_minute_boundary(self.index[row], every_minutes))
            .collect();
        Frame {
            index: keep.iter().map(|&r| self.index[r]).collect(),
            columns: self.columns.clone(),
            values: self
                .values
                .iter()
                .map(|col| keep.iter().map(|&r| col[r]).collect())
                .collect(),
        }
    }

    /// Per-row mean across the named columns (missing cells skipped).
    pub fn row_mean(&self, names: &[String]) -> Result<Vec<Option<f64>>> {
        let cols: Vec<&[Option<f64>]> = names
            .iter()
            .map(|n| {
                self.column(n)
                    .ok_or_else(|| Error::NotFound(format!("column {}", n)))
            })
            .collect::<Result<_>>()?;
        Ok((0..self.index.len())
            .map(|row| mean(cols.iter().map(|c| c[row])))
            .collect())
    }

    /// Per-row sample standard deviation across the named columns.
    pub fn row_std(&self, names: &[String]) -> Result<Vec<Option<f64>>> {
        let cols: Vec<&[Option<f64>]> = names
            .iter()
            .map(|n| {
                self.column(n)
                    .ok_or_else(|| Error::NotFound(format!("column {}", n)))
            })
            .collect::<Result<_>>()?;
        Ok((0..self.index.len())
            .map(|row| sample_std(cols.iter().map(|c| c[row])))
            .collect())
    }
}

/// Mean of the present values; `None` when none are present.
pub fn mean<I: Iterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.flatten() {
        sum += v;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Sample standard deviation (ddof = 1) of the present values.
pub fn sample_std<I: Iterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    let present: Vec<f64> = values.flatten().collect();
    if present.len() < 2 {
        return None;
    }
    let mu = present.iter().sum::<f64>() / present.len() as f64;
    let var = present.iter().map(|v| (v - mu).powi(2)).sum::<f64>()
        / (present.len() - 1) as f64;
    Some(var.sqrt())
}
