// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod collect;
pub mod config;
pub mod error;
pub mod format;
pub mod manifest;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod store;
pub mod transform;
pub mod validate;

// ---- Re-exports for stable public API ----
pub use crate::collect::{CollectContext, Collector, SourceCollector};
pub use crate::config::CollectConfig;
pub use crate::error::{CollectError, FetchError, ValidationError};
pub use crate::model::{CollectorOutput, Manifest, Metric, PeriodKey, SourceInfo, Timeseries, TimeseriesPoint};
pub use crate::pipeline::{Pipeline, RunFailure, RunReport, SourceStatus};
pub use crate::store::DataStore;
