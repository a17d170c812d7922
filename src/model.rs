//! # Data model
//! Canonical, serializable shape of everything the dashboard reads:
//! per-source [`CollectorOutput`] files and the [`Manifest`] index.
//!
//! Field names match the JSON read contract of the front-end, so renaming a
//! field here is a breaking change for the dashboard.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::format::Notation;

/// Bucketing key of a timeseries point.
///
/// Always a calendar date. Year buckets are `YYYY-01-01`, month buckets
/// `YYYY-MM-01`. A bare `YYYY` (older files) parses to January 1st of that
/// year, so both spellings collapse onto one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey(NaiveDate);

impl PeriodKey {
    pub fn year(year: i32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, 1, 1).map(Self)
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    /// Month bucket containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        // Day 1 of an existing month always exists.
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year_number(&self) -> i32 {
        self.0.year()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period key {0:?} (expected YYYY, YYYY-MM or YYYY-MM-DD)")]
pub struct PeriodKeyError(pub String);

impl FromStr for PeriodKey {
    type Err = PeriodKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let err = || PeriodKeyError(s.to_string());
        match t.len() {
            4 => {
                let y: i32 = t.parse().map_err(|_| err())?;
                Self::year(y).ok_or_else(err)
            }
            7 => {
                let (y, m) = t.split_once('-').ok_or_else(err)?;
                let y: i32 = y.parse().map_err(|_| err())?;
                let m: u32 = m.parse().map_err(|_| err())?;
                Self::month(y, m).ok_or_else(err)
            }
            _ => NaiveDate::parse_from_str(t, "%Y-%m-%d")
                .map(Self)
                .map_err(|_| err()),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Display metadata of one tracked repository. Defined in code per collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub current_value: f64,
    pub formatted_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Metric {
    /// Build a metric whose display string is rendered with `notation`.
    pub fn new(
        id: &str,
        name: &str,
        unit: &str,
        current_value: f64,
        notation: Notation,
        description: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            current_value,
            formatted_value: notation.render(current_value),
            description: Some(description.to_string()),
        }
    }
}

/// One bucket: what was added in the period and the running total through it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeseriesPoint {
    pub date: PeriodKey,
    pub value: f64,
    pub cumulative: f64,
}

impl TimeseriesPoint {
    pub fn new(date: PeriodKey, value: f64, cumulative: f64) -> Self {
        Self {
            date,
            value,
            cumulative,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeseries {
    pub metric_id: String,
    pub data: Vec<TimeseriesPoint>,
}

impl Timeseries {
    pub fn last_cumulative(&self) -> Option<f64> {
        self.data.last().map(|p| p.cumulative)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputMetadata {
    pub last_updated: DateTime<Utc>,
    pub update_frequency: String,
    #[serde(default)]
    pub data_license: Option<String>,
}

/// Everything persisted for one source in `<data_dir>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorOutput {
    pub source: SourceInfo,
    pub metrics: Vec<Metric>,
    pub timeseries: Vec<Timeseries>,
    pub metadata: OutputMetadata,
}

impl CollectorOutput {
    pub fn total_points(&self) -> usize {
        self.timeseries.iter().map(|t| t.data.len()).sum()
    }

    pub fn metric(&self, id: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }

    pub fn timeseries_for(&self, metric_id: &str) -> Option<&Timeseries> {
        self.timeseries.iter().find(|t| t.metric_id == metric_id)
    }
}

pub const MANIFEST_VERSION: &str = "1.0.0";

/// Index read first by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default = "default_manifest_version")]
    pub version: String,
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
}

fn default_manifest_version() -> String {
    MANIFEST_VERSION.to_string()
}

impl Manifest {
    pub fn lists(&self, id: &str) -> bool {
        self.sources.iter().any(|s| s == id)
    }
}
