// src/collect/types.rs
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::collect::http::HttpClient;
use crate::collect::raw_cache::RawCache;
use crate::config::CollectConfig;
use crate::error::{CollectError, FetchError};
use crate::merge::SeriesBasis;
use crate::model::{CollectorOutput, SourceInfo};

/// File name of the last raw payload inside a source's raw cache directory.
pub const RAW_PAYLOAD_FILE: &str = "payload.json";

/// What every adapter gets for one run.
#[derive(Debug, Clone)]
pub struct CollectContext {
    pub http: HttpClient,
    pub raw_root: PathBuf,
    /// Wall clock of the run; stamped into `metadata.last_updated`.
    pub now: DateTime<Utc>,
}

impl CollectContext {
    pub fn new(http: HttpClient, raw_root: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            http,
            raw_root: raw_root.into(),
            now,
        }
    }

    pub fn from_config(cfg: &CollectConfig, now: DateTime<Utc>) -> Result<Self, FetchError> {
        Ok(Self::new(HttpClient::from_config(cfg)?, cfg.raw_dir.clone(), now))
    }

    pub fn raw_cache(&self, source_id: &str) -> RawCache {
        RawCache::new(self.raw_root.join(source_id))
    }
}

/// A source adapter split in two: `collect` talks to the network and returns
/// a raw payload; `transform` is pure and turns that payload into the
/// canonical output.
#[async_trait::async_trait]
pub trait SourceCollector: Send + Sync {
    type Raw: Serialize + DeserializeOwned + Send + Sync;

    fn source_info(&self) -> SourceInfo;

    /// How the points built by `transform` are merged with persisted ones.
    fn series_basis(&self) -> SeriesBasis {
        SeriesBasis::Increments
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Self::Raw, FetchError>;

    fn transform(&self, raw: Self::Raw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError>;
}

/// Object-safe view the pipeline iterates over.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> SourceInfo;

    fn source_id(&self) -> String {
        self.source().id
    }

    fn merge_basis(&self) -> SeriesBasis {
        SeriesBasis::Increments
    }

    async fn fetch_output(&self, ctx: &CollectContext) -> Result<CollectorOutput, CollectError>;
}

#[async_trait::async_trait]
impl<T: SourceCollector> Collector for T {
    fn source(&self) -> SourceInfo {
        self.source_info()
    }

    fn merge_basis(&self) -> SeriesBasis {
        self.series_basis()
    }

    async fn fetch_output(&self, ctx: &CollectContext) -> Result<CollectorOutput, CollectError> {
        let id = self.source_info().id;
        let t0 = Instant::now();
        let raw = self.collect(ctx).await?;
        histogram!("collect_fetch_ms", "source" => id.clone()).record(t0.elapsed().as_millis() as f64);

        // Raw payload is kept for debugging and re-runs of the transform.
        ctx.raw_cache(&id)
            .write_json(RAW_PAYLOAD_FILE, &raw)
            .map_err(FetchError::from)?;

        Ok(self.transform(raw, ctx.now)?)
    }
}
