//! Historical data handle and date-range filtering
//!
//! Historical data is a CSV file with a header row and the columns
//! `datetime,open,high,low,close,volume`. Timestamps are RFC 3339 or
//! `YYYY-MM-DD HH:MM:SS` (assumed UTC).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Date format of the date-range filter fields
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Candle
// =============================================================================

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// =============================================================================
// Historical data handle
// =============================================================================

/// Read-only handle to a historical data file, shared by every worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalData {
    path: PathBuf,
}

impl HistoricalData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HistoricalData { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file exists and is a regular file
    pub fn is_reachable(&self) -> bool {
        self.path.is_file()
    }

    /// Load every candle from the file
    pub fn load(&self) -> Result<Vec<Candle>> {
        load_csv(&self.path)
    }
}

/// Load OHLCV data from a CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_timestamp(dt_str)
            .with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let column = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column in row {}", name, row_idx + 1))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} in row {}", name, row_idx + 1))
        };

        candles.push(Candle {
            datetime,
            open: column(1, "open")?,
            high: column(2, "high")?,
            low: column(3, "low")?,
            close: column(4, "close")?,
            volume: column(5, "volume")?,
        });
    }

    if candles.windows(2).any(|w| w[1].datetime < w[0].datetime) {
        anyhow::bail!("Candles in {} are not in chronological order", path.display());
    }

    Ok(candles)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, DATE_FORMAT)?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// =============================================================================
// Date range
// =============================================================================

/// Date range as entered by the user, validated when a run starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRangeSpec {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// Ignore `start`/`end` and use every candle
    #[serde(default)]
    pub use_all_data: bool,
}

impl DateRangeSpec {
    pub fn all_data() -> Self {
        DateRangeSpec {
            use_all_data: true,
            ..Default::default()
        }
    }

    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        DateRangeSpec {
            start: Some(start.into()),
            end: Some(end.into()),
            use_all_data: false,
        }
    }

    /// Parse into a [`DateWindow`]; blank fields leave that side open
    pub fn resolve(&self) -> Result<DateWindow, ConfigError> {
        if self.use_all_data {
            return Ok(DateWindow::all());
        }

        let start = parse_bound(self.start.as_deref(), "date_range.start", false)?;
        let end = parse_bound(self.end.as_deref(), "date_range.end", true)?;

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ConfigError::InvertedDateRange {
                    start: s.format(DATE_FORMAT).to_string(),
                    end: e.format(DATE_FORMAT).to_string(),
                });
            }
        }

        Ok(DateWindow { start, end })
    }
}

/// Date-only values cover the whole day: start at 00:00:00, end at 23:59:59
fn parse_bound(
    value: Option<&str>,
    field: &'static str,
    end_of_day: bool,
) -> Result<Option<DateTime<Utc>>, ConfigError> {
    let value = match value.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(v) => v,
    };

    let naive = NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
            if end_of_day {
                date.and_hms_opt(23, 59, 59)
            } else {
                date.and_hms_opt(0, 0, 0)
            }
        })
        .ok_or_else(|| ConfigError::InvalidDate {
            field,
            value: value.to_string(),
        })?;

    Ok(Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)))
}

/// Inclusive time window applied to historical data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn all() -> Self {
        DateWindow::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }

    /// Candles inside the window, in order
    pub fn apply(&self, candles: &[Candle]) -> Vec<Candle> {
        candles
            .iter()
            .filter(|c| self.contains(c.datetime))
            .cloned()
            .collect()
    }
}
