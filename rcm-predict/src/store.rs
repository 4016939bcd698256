//! Incremental SQL source and sink
//!
//! The source exposes timestamp-bounded reads of the four input tables;
//! the sink tracks a per-table watermark (the maximum persisted timestamp)
//! and only ever appends rows. Timestamps are persisted as RFC3339 TEXT.
//! Connectivity or query failures are fatal for the run; any retry policy
//! belongs to the external scheduler.

use chrono::{DateTime, Utc};
use sqlx::{Column, Row, SqlitePool};
use tracing::{debug, info};

use rcm_common::config::{InputTables, OutputTables};
use rcm_common::series::Frame;
use rcm_common::time::watermark_sentinel;

use crate::error::{PredictError, PredictResult};

/// Read access to the raw time-series source.
pub struct SqlSource {
    pool: SqlitePool,
    timestamp_column: String,
}

impl SqlSource {
    pub fn new(pool: SqlitePool, timestamp_column: impl Into<String>) -> Self {
        Self {
            pool,
            timestamp_column: timestamp_column.into(),
        }
    }

    /// All rows of `table` with timestamp `>= since` (inclusive) or
    /// `> since` (exclusive); the whole table when `since` is `None`.
    pub async fn fetch_since(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
        inclusive: bool,
    ) -> PredictResult<Frame> {
        let mut sql = format!("SELECT * FROM {}", table);
        if since.is_some() {
            let op = if inclusive { ">=" } else { ">" };
            sql.push_str(&format!(" WHERE {} {} ?", self.timestamp_column, op));
        }
        sql.push_str(&format!(" ORDER BY {}", self.timestamp_column));

        let mut query = sqlx::query(&sql);
        if let Some(since) = since {
            query = query.bind(since.to_rfc3339());
        }
        let rows = query.fetch_all(&self.pool).await?;
        debug!(table, rows = rows.len(), "Fetched source rows");

        let Some(first) = rows.first() else {
            return Ok(Frame::new());
        };
        let value_columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .filter(|name| *name != self.timestamp_column)
            .collect();

        let mut index = Vec::with_capacity(rows.len());
        let mut values: Vec<Vec<Option<f64>>> =
            vec![Vec::with_capacity(rows.len()); value_columns.len()];
        for row in &rows {
            let raw: String = row.try_get(self.timestamp_column.as_str())?;
            index.push(parse_timestamp(&raw)?);
            for (col, name) in values.iter_mut().zip(&value_columns) {
                col.push(row.try_get(name.as_str())?);
            }
        }
        Ok(Frame::from_columns(
            index,
            value_columns.into_iter().zip(values).collect(),
        )?)
    }
}

/// The four logical input tables behind one source connection.
pub struct InputHandler {
    source: SqlSource,
    tables: InputTables,
}

impl InputHandler {
    pub fn new(source: SqlSource, tables: InputTables) -> Self {
        Self { source, tables }
    }

    /// Reactor temperature series (columns = raw sensor tags).
    pub async fn fetch_temperatures(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PredictResult<Frame> {
        self.source
            .fetch_since(&self.tables.temperatures, since, true)
            .await
    }

    /// The three chemical-analysis tables outer-joined on timestamp.
    ///
    /// Fetched exclusively so a row landing exactly on a previous watermark
    /// boundary is not duplicated when the tables are merged.
    pub async fn fetch_analysis(&self, since: Option<DateTime<Utc>>) -> PredictResult<Frame> {
        let mut merged = Frame::new();
        for table in self.tables.analysis() {
            let part = self.source.fetch_since(table, since, false).await?;
            merged = merged.outer_join(&part).map_err(PredictError::Common)?;
        }
        Ok(merged)
    }
}

/// One long-format prediction record.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub timestamp: DateTime<Utc>,
    pub plate: String,
    pub sensor: String,
    pub horizon: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureRow {
    pub timestamp: DateTime<Utc>,
    pub plate: String,
    pub sensor: String,
    pub temperature: f64,
}

/// Mean-temperature difference between a vertically adjacent plate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureDiffRow {
    pub timestamp: DateTime<Utc>,
    /// `"<above> - <below>"` plate-pair label.
    pub plates: String,
    pub difference: f64,
}

/// Temperature standard deviation, per plate (sensor = None) or per sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureStdRow {
    pub timestamp: DateTime<Utc>,
    pub plate: String,
    pub sensor: Option<String>,
    pub std_dev: f64,
}

/// Append-only access to the four output tables.
pub struct SqlSink {
    pool: SqlitePool,
    timestamp_column: String,
    tables: OutputTables,
}

impl SqlSink {
    pub fn new(pool: SqlitePool, timestamp_column: impl Into<String>, tables: OutputTables) -> Self {
        Self {
            pool,
            timestamp_column: timestamp_column.into(),
            tables,
        }
    }

    pub fn tables(&self) -> &OutputTables {
        &self.tables
    }

    /// Create the output tables when they do not exist yet.
    pub async fn ensure_tables(&self) -> PredictResult<()> {
        let ts = &self.timestamp_column;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    {} TEXT NOT NULL,
                    plate TEXT NOT NULL,
                    sensor TEXT NOT NULL,
                    horizon TEXT NOT NULL,
                    probability REAL NOT NULL
                )",
                self.tables.predictions, ts
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    {} TEXT NOT NULL,
                    plate TEXT NOT NULL,
                    sensor TEXT NOT NULL,
                    temperature REAL NOT NULL
                )",
                self.tables.temperatures, ts
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    {} TEXT NOT NULL,
                    plates TEXT NOT NULL,
                    difference REAL NOT NULL
                )",
                self.tables.temperature_diffs, ts
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    {} TEXT NOT NULL,
                    plate TEXT NOT NULL,
                    sensor TEXT,
                    std_dev REAL NOT NULL
                )",
                self.tables.temperature_stds, ts
            ),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Last persisted timestamp of `table`, or the sentinel for an empty
    /// table. Emptiness is checked before the MAX aggregate, since an
    /// aggregate over zero rows is ambiguous with real data.
    pub async fn find_watermark(&self, table: &str) -> PredictResult<DateTime<Utc>> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Ok(watermark_sentinel());
        }
        let max: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX({}) FROM {}",
            self.timestamp_column, table
        ))
        .fetch_one(&self.pool)
        .await?;
        let raw = max.ok_or_else(|| {
            PredictError::Common(rcm_common::Error::InvalidInput(format!(
                "table {} has rows but no timestamps",
                table
            )))
        })?;
        parse_timestamp(&raw)
    }

    pub async fn write_predictions(&self, rows: &[PredictionRow]) -> PredictResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} ({}, plate, sensor, horizon, probability) VALUES (?, ?, ?, ?, ?)",
            self.tables.predictions, self.timestamp_column
        );
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(row.timestamp.to_rfc3339())
                .bind(&row.plate)
                .bind(&row.sensor)
                .bind(&row.horizon)
                .bind(row.probability)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(rows = rows.len(), table = %self.tables.predictions, "Appended predictions");
        Ok(())
    }

    pub async fn write_temperatures(&self, rows: &[TemperatureRow]) -> PredictResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} ({}, plate, sensor, temperature) VALUES (?, ?, ?, ?)",
            self.tables.temperatures, self.timestamp_column
        );
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(row.timestamp.to_rfc3339())
                .bind(&row.plate)
                .bind(&row.sensor)
                .bind(row.temperature)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(rows = rows.len(), table = %self.tables.temperatures, "Appended temperatures");
        Ok(())
    }

    pub async fn write_temperature_diffs(
        &self,
        rows: &[TemperatureDiffRow],
    ) -> PredictResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} ({}, plates, difference) VALUES (?, ?, ?)",
            self.tables.temperature_diffs, self.timestamp_column
        );
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(row.timestamp.to_rfc3339())
                .bind(&row.plates)
                .bind(row.difference)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn write_temperature_stds(
        &self,
        rows: &[TemperatureStdRow],
    ) -> PredictResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} ({}, plate, sensor, std_dev) VALUES (?, ?, ?, ?)",
            self.tables.temperature_stds, self.timestamp_column
        );
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&sql)
                .bind(row.timestamp.to_rfc3339())
                .bind(&row.plate)
                .bind(row.sensor.as_deref())
                .bind(row.std_dev)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> PredictResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            PredictError::Common(rcm_common::Error::InvalidInput(format!(
                "bad timestamp {}: {}",
                raw, e
            )))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rcm_common::db::connect_pool;

    fn output_tables() -> OutputTables {
        OutputTables {
            predictions: "predictions".to_string(),
            temperatures: "out_temperatures".to_string(),
            temperature_diffs: "temperature_diffs".to_string(),
            temperature_stds: "temperature_stds".to_string(),
        }
    }

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    async fn seeded_source() -> SqlSource {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE temps (ts TEXT NOT NULL, raw_t911 REAL, raw_t912 REAL)")
            .execute(&pool)
            .await
            .unwrap();
        for (day, a, b) in [(1, 500.0, 501.0), (2, 502.0, 503.0), (3, 504.0, 505.0)] {
            sqlx::query("INSERT INTO temps (ts, raw_t911, raw_t912) VALUES (?, ?, ?)")
                .bind(ts(day, 0).to_rfc3339())
                .bind(a)
                .bind(b)
                .execute(&pool)
                .await
                .unwrap();
        }
        SqlSource::new(pool, "ts")
    }

    #[tokio::test]
    async fn test_fetch_since_inclusive_and_exclusive() {
        let source = seeded_source().await;
        let all = source.fetch_since("temps", None, true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.column_names(), &["raw_t911", "raw_t912"]);

        let inclusive = source
            .fetch_since("temps", Some(ts(2, 0)), true)
            .await
            .unwrap();
        assert_eq!(inclusive.len(), 2);
        assert_eq!(inclusive.first_timestamp(), Some(ts(2, 0)));

        let exclusive = source
            .fetch_since("temps", Some(ts(2, 0)), false)
            .await
            .unwrap();
        assert_eq!(exclusive.len(), 1);
        assert_eq!(exclusive.first_timestamp(), Some(ts(3, 0)));
    }

    #[tokio::test]
    async fn test_fetch_since_empty_table() {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE temps (ts TEXT NOT NULL, raw_t911 REAL)")
            .execute(&pool)
            .await
            .unwrap();
        let source = SqlSource::new(pool, "ts");
        let frame = source.fetch_since("temps", None, true).await.unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_watermark_sentinel_then_advance() {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        let sink = SqlSink::new(pool, "ts", output_tables());
        sink.ensure_tables().await.unwrap();

        assert_eq!(
            sink.find_watermark("predictions").await.unwrap(),
            watermark_sentinel()
        );

        let rows = vec![
            PredictionRow {
                timestamp: ts(1, 12),
                plate: "9".to_string(),
                sensor: "T911".to_string(),
                horizon: "24h".to_string(),
                probability: 0.25,
            },
            PredictionRow {
                timestamp: ts(2, 12),
                plate: "9".to_string(),
                sensor: "T911".to_string(),
                horizon: "24h".to_string(),
                probability: 0.5,
            },
        ];
        sink.write_predictions(&rows).await.unwrap();
        assert_eq!(sink.find_watermark("predictions").await.unwrap(), ts(2, 12));
    }

    #[tokio::test]
    async fn test_write_empty_is_noop() {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        let sink = SqlSink::new(pool, "ts", output_tables());
        sink.ensure_tables().await.unwrap();

        sink.write_predictions(&[]).await.unwrap();
        sink.write_temperatures(&[]).await.unwrap();
        assert_eq!(
            sink.find_watermark("predictions").await.unwrap(),
            watermark_sentinel()
        );
    }
}
