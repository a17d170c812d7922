//! Error taxonomy of a collection run.
//!
//! [`FetchError`] is what adapters return; everything that can stop one
//! source from being persisted is folded into [`CollectError`]. Errors never
//! cross the per-source boundary in [`crate::pipeline`].

use std::path::PathBuf;

use thiserror::Error;

use crate::model::PeriodKey;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transient transport failure (connect, timeout, 5xx, 429). Retried.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered, but not in a shape we can use (including a
    /// non-transient HTTP status). Needs an adapter update.
    #[error("upstream format error: {0}")]
    UpstreamFormat(String),

    /// Required setting (credentials, project id) is missing.
    #[error("collector not configured: {0}")]
    Unconfigured(String),

    /// Local raw-payload cache could not be read or written.
    #[error("raw cache I/O error: {0}")]
    Cache(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        FetchError::UpstreamFormat(msg.into())
    }
}

/// Invariant violations of a transformed or merged output.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{metric}: period {period} does not come after {previous}")]
    Unsorted {
        metric: String,
        previous: PeriodKey,
        period: PeriodKey,
    },

    #[error("{metric}: negative cumulative {cumulative} at {period}")]
    NegativeCumulative {
        metric: String,
        period: PeriodKey,
        cumulative: f64,
    },

    #[error("{metric}: cumulative decreases ({value}) at {period}")]
    NonMonotonic {
        metric: String,
        period: PeriodKey,
        value: f64,
    },

    #[error("{metric}: cumulative {cumulative} at {period} should be {expected}")]
    RunningSum {
        metric: String,
        period: PeriodKey,
        cumulative: f64,
        expected: f64,
    },

    #[error("{metric}: timeseries has no points")]
    EmptySeries { metric: String },

    #[error("timeseries {metric} has no matching metric")]
    OrphanSeries { metric: String },

    #[error("{metric}: current_value {current} differs from charted total {charted} (relative {ratio:.5})")]
    Drift {
        metric: String,
        current: f64,
        charted: f64,
        ratio: f64,
    },
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Incoming data would have erased persisted history; the old file was kept.
    #[error("refused to overwrite {retained_points} persisted points of {source_id} with an empty fetch")]
    MergeConflict {
        source_id: String,
        retained_points: usize,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CollectError {
    /// Short machine-friendly label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Fetch(FetchError::Network(_)) => "network",
            CollectError::Fetch(FetchError::UpstreamFormat(_)) => "upstream_format",
            CollectError::Fetch(FetchError::Unconfigured(_)) => "unconfigured",
            CollectError::Fetch(FetchError::Cache(_)) => "raw_cache",
            CollectError::MergeConflict { .. } => "merge_conflict",
            CollectError::Validation(_) => "validation",
            CollectError::Io { .. } => "io",
            CollectError::Corrupt { .. } => "corrupt",
            CollectError::Serialize { .. } => "serialize",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollectError::Io {
            path: path.into(),
            source,
        }
    }
}
