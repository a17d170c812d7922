// src/collect/providers/cellxgene.rs
//! CellxGene single-cell growth.
//!
//! Cell counts come from dataset metadata of the curation API. A dataset is
//! dated by its collection DOI's CrossRef `created` date, falling back to the
//! collection's `published_at` when CrossRef does not know the DOI. DOI
//! lookups are cached on disk across runs; a dataset whose lookup failed is
//! left out of the run instead of being dated differently later. The monthly
//! series is rescaled onto the census `unique_cell_count` (not every dataset
//! can be dated).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::collect::http::{join_url, parse_json, read_text, HttpClient};
use crate::collect::{CollectContext, SourceCollector};
use crate::config::collect::CellxGeneConfig;
use crate::error::FetchError;
use crate::format::Notation;
use crate::model::{CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo};
use crate::parse::parse_count;
use crate::store::write_atomic;
use crate::transform::{bucket, resolve_current_value, series_from_increments};

pub const SOURCE_ID: &str = "cellxgene";

#[derive(Debug, Deserialize)]
struct CollectionDoc {
    #[serde(default, alias = "collection_doi")]
    doi: Option<String>,
    #[serde(default)]
    published_at: Option<Value>,
    #[serde(default)]
    datasets: Vec<DatasetDoc>,
}

#[derive(Debug, Deserialize)]
struct DatasetDoc {
    #[serde(default)]
    dataset_id: Option<String>,
    #[serde(default, alias = "dataset_total_cell_count", alias = "total_cell_count")]
    cell_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SummaryRow {
    label: String,
    value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub dataset_id: String,
    pub cell_count: u64,
    #[serde(default)]
    pub doi: Option<String>,
    /// Collection publication timestamp (RFC 3339), the fallback date.
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellxGeneRaw {
    pub datasets: Vec<DatasetRow>,
    /// CrossRef `created` timestamps; `None` for DOIs CrossRef does not know.
    /// DOIs whose lookup failed this run are absent.
    #[serde(default)]
    pub doi_dates: BTreeMap<String, Option<String>>,
    pub unique_cell_count: u64,
}

/// `https://doi.org/10.1/x`, `doi:10.1/x` and ` 10.1/x ` all become `10.1/x`.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let t = raw.trim();
    let lower = t.to_ascii_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find(|p| lower.starts_with(*p))
        .map_or(t, |p| &t[p.len()..])
        .trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}

/// Accepts RFC 3339 strings, `YYYY-MM-DD` prefixes and unix seconds.
fn timestamp_to_rfc3339(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs as i64, 0).map(|d| d.to_rfc3339())
        }
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.date_naive())
        .ok()
        .or_else(|| s.get(..10).and_then(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok()))
}

/// On-disk DOI -> CrossRef date map, kept between runs.
#[derive(Debug, Default)]
pub struct DoiCache {
    path: PathBuf,
    entries: BTreeMap<String, Option<String>>,
}

impl DoiCache {
    /// Missing or unreadable files start an empty cache.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(source = SOURCE_ID, path = %path.display(), error = %e, "DOI cache unreadable; starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, doi: &str) -> Option<&Option<String>> {
        self.entries.get(doi)
    }

    pub fn insert(&mut self, doi: String, date: Option<String>) {
        self.entries.insert(doi, date);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.path, &json)
    }
}

/// CrossRef `message.created.date-time`. A 404 means CrossRef does not know the
/// DOI and is cached as a miss; anything else is left for the next run.
async fn crossref_created(http: &HttpClient, url: &str) -> Result<Option<String>, FetchError> {
    let resp = http.send_raw(url, |c| c.get(url)).await?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !resp.status().is_success() {
        return Err(FetchError::upstream(format!("{url}: HTTP {}", resp.status())));
    }
    let body: Value = parse_json(url, &read_text(url, resp).await?)?;
    Ok(body
        .pointer("/message/created/date-time")
        .and_then(Value::as_str)
        .map(str::to_string))
}

pub struct CellxGeneCollector {
    cfg: CellxGeneConfig,
}

impl CellxGeneCollector {
    pub fn new(cfg: CellxGeneConfig) -> Self {
        Self { cfg }
    }

    async fn datasets(&self, http: &HttpClient) -> Result<Vec<DatasetRow>, FetchError> {
        let collections: Vec<CollectionDoc> = http.get_json(&self.cfg.collections_url).await?;
        let mut rows = Vec::new();
        let mut without_count = 0usize;
        for col in collections {
            let doi = col.doi.as_deref().and_then(normalize_doi);
            let published_at = col.published_at.as_ref().and_then(timestamp_to_rfc3339);
            for ds in col.datasets {
                match (ds.dataset_id, ds.cell_count) {
                    (Some(dataset_id), Some(cell_count)) => rows.push(DatasetRow {
                        dataset_id,
                        cell_count,
                        doi: doi.clone(),
                        published_at: published_at.clone(),
                    }),
                    _ => without_count += 1,
                }
            }
        }
        if without_count > 0 {
            tracing::debug!(source = SOURCE_ID, without_count, "datasets without id or cell_count");
        }
        if rows.is_empty() {
            return Err(FetchError::upstream("curation API returned no datasets with cell counts"));
        }
        Ok(rows)
    }

    fn summary_url(&self) -> Result<&str, FetchError> {
        self.cfg
            .summary_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FetchError::Unconfigured("cellxgene.summary_url is not set".to_string()))
    }

    async fn unique_cell_count(&self, http: &HttpClient, url: &str) -> Result<u64, FetchError> {
        let rows: Vec<SummaryRow> = http.get_json(url).await?;
        let value = rows
            .iter()
            .find(|r| r.label == "unique_cell_count")
            .ok_or_else(|| FetchError::upstream("census summary has no unique_cell_count row"))?;
        let count = match &value.value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => parse_count(s),
            _ => None,
        };
        count.ok_or_else(|| FetchError::upstream(format!("unique_cell_count is not a count: {}", value.value)))
    }

    /// Resolve DOIs missing from the cache with bounded concurrency.
    async fn resolve_dois(&self, http: &HttpClient, cache: &mut DoiCache, dois: &BTreeSet<String>) {
        let missing: Vec<String> = dois.iter().filter(|d| cache.get(d).is_none()).cloned().collect();
        tracing::info!(
            source = SOURCE_ID,
            cached = dois.len() - missing.len(),
            to_fetch = missing.len(),
            "CrossRef lookups"
        );
        if missing.is_empty() {
            return;
        }

        let permits = Arc::new(Semaphore::new(self.cfg.doi_concurrency.max(1)));
        let mut set = JoinSet::new();
        for doi in missing {
            let http = http.clone();
            let permits = Arc::clone(&permits);
            let url = join_url(&self.cfg.crossref_url, &doi);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let res = crossref_created(&http, &url).await;
                (doi, res)
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((doi, Ok(date))) => cache.insert(doi, date),
                Ok((doi, Err(e))) => {
                    failed += 1;
                    tracing::debug!(source = SOURCE_ID, %doi, error = %e, "CrossRef lookup failed");
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(source = SOURCE_ID, error = %e, "CrossRef lookup task failed");
                }
            }
        }
        if failed > 0 {
            tracing::warn!(source = SOURCE_ID, failed, "CrossRef lookups not resolved; will retry next run");
        }
        if let Err(e) = cache.save() {
            tracing::warn!(source = SOURCE_ID, error = %e, "could not save DOI cache");
        }
    }
}

#[async_trait]
impl SourceCollector for CellxGeneCollector {
    type Raw = CellxGeneRaw;

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: SOURCE_ID.to_string(),
            name: "CellxGene Census".to_string(),
            description: "CZI's single-cell RNA-seq data repository".to_string(),
            url: "https://chanzuckerberg.github.io/cellxgene-census/".to_string(),
            color: "#10b981".to_string(),
            icon: Some("cell".to_string()),
        }
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<CellxGeneRaw, FetchError> {
        let summary_url = self.summary_url()?;
        let datasets = self.datasets(&ctx.http).await?;
        let unique_cell_count = self.unique_cell_count(&ctx.http, summary_url).await?;

        let dois: BTreeSet<String> = datasets.iter().filter_map(|d| d.doi.clone()).collect();
        let mut cache = DoiCache::load(&self.cfg.doi_cache_path);
        self.resolve_dois(&ctx.http, &mut cache, &dois).await;
        let doi_dates = dois
            .into_iter()
            .filter_map(|d| cache.get(&d).cloned().map(|date| (d, date)))
            .collect();

        Ok(CellxGeneRaw {
            datasets,
            doi_dates,
            unique_cell_count,
        })
    }

    fn transform(&self, raw: CellxGeneRaw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError> {
        let mut undated = 0u64;
        let mut pending = 0u64;
        let mut rows: Vec<(PeriodKey, f64)> = Vec::with_capacity(raw.datasets.len());
        for ds in &raw.datasets {
            let published = || ds.published_at.as_deref().and_then(parse_date);
            let date = match ds.doi.as_ref().map(|d| raw.doi_dates.get(d)) {
                // Lookup failed this run; falling back now would move these
                // cells to another month once CrossRef answers.
                Some(None) => {
                    pending += ds.cell_count;
                    continue;
                }
                Some(Some(Some(created))) => parse_date(created).or_else(published),
                Some(Some(None)) | None => published(),
            };
            match date {
                Some(d) => rows.push((PeriodKey::month_of(d), ds.cell_count as f64)),
                None => undated += ds.cell_count,
            }
        }
        if undated > 0 || pending > 0 {
            tracing::info!(
                source = SOURCE_ID,
                undated_cells = undated,
                pending_cells = pending,
                "cells not charted this run"
            );
        }
        if rows.is_empty() {
            return Err(FetchError::upstream("no cellxgene dataset could be dated"));
        }

        let mut series = series_from_increments("cells", &bucket(rows));
        let current = resolve_current_value(Some(raw.unique_cell_count as f64), &mut series);

        Ok(CollectorOutput {
            source: self.source_info(),
            metrics: vec![Metric::new(
                "cells",
                "Single Cells",
                "cells",
                current,
                Notation::Suffix,
                "Total single cells profiled",
            )],
            timeseries: vec![series],
            metadata: OutputMetadata {
                last_updated: fetched_at,
                update_frequency: "quarterly".to_string(),
                data_license: Some("CC BY 4.0".to_string()),
            },
        })
    }
}
