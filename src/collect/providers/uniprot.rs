// src/collect/providers/uniprot.rs
//! UniProtKB growth from the archive of previous releases.
//!
//! The listing page is scraped for `release-YYYY_MM/` folders, the latest
//! release of every year is kept, and its `relnotes.txt` is fetched once and
//! cached by file name (release notes never change). Files that do not parse
//! are reported and skipped. The REST search endpoint tops up the current
//! year with the live total.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::collect::http::{join_url, HttpClient};
use crate::collect::raw_cache::RawCache;
use crate::collect::{CollectContext, SourceCollector};
use crate::config::collect::UniProtConfig;
use crate::error::FetchError;
use crate::format::Notation;
use crate::merge::SeriesBasis;
use crate::model::{CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo};
use crate::parse::html::links;
use crate::parse::relnotes::{ReleaseId, ReleaseNotes, ReleaseRecord, SkipReason};
use crate::transform::{latest_per_period, series_from_snapshots};

pub const SOURCE_ID: &str = "uniprot";
const TOTAL_HEADER: &str = "X-Total-Results";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniProtRaw {
    pub releases: Vec<ReleaseRecord>,
    #[serde(default)]
    pub skipped: usize,
    /// Live UniProtKB total from the REST search, when reachable.
    #[serde(default)]
    pub current_total: Option<u64>,
    pub current_year: i32,
}

/// Outcome of reading cached release notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReleases {
    pub records: Vec<ReleaseRecord>,
    pub skipped: Vec<SkipReason>,
}

/// Release folders named in a directory listing, sorted and de-duplicated.
pub fn list_releases(listing_html: &str) -> Vec<ReleaseId> {
    let mut out: Vec<ReleaseId> = links(listing_html)
        .iter()
        .filter_map(|href| {
            let name = href.trim_end_matches('/').rsplit('/').next()?;
            name.parse().ok()
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Latest release of each year from `first_year` on.
pub fn latest_per_year(releases: &[ReleaseId], first_year: i32) -> Vec<ReleaseId> {
    let mut by_year: BTreeMap<i32, ReleaseId> = BTreeMap::new();
    for r in releases.iter().filter(|r| r.year >= first_year) {
        let slot = by_year.entry(r.year).or_insert(*r);
        if *r > *slot {
            *slot = *r;
        }
    }
    by_year.into_values().collect()
}

/// Parse the cached notes of `releases`. Malformed or missing files are
/// skipped with a reason; it is an error only when nothing parses at all.
pub fn releases_from_cache(cache: &RawCache, releases: &[ReleaseId]) -> Result<ParsedReleases, FetchError> {
    let mut out = ParsedReleases::default();
    for &release in releases {
        let Some(text) = cache.read_text(&release.notes_file_name())? else {
            out.skipped.push(SkipReason::NotCached { release });
            continue;
        };
        for item in ReleaseNotes::for_release(&text, release).records() {
            match item {
                Ok(record) => out.records.push(record),
                Err(reason) => out.skipped.push(reason),
            }
        }
    }
    for reason in &out.skipped {
        tracing::warn!(source = SOURCE_ID, %reason, "skipped release notes");
    }
    if out.records.is_empty() {
        return Err(FetchError::upstream(format!(
            "none of {} release notes could be parsed",
            releases.len()
        )));
    }
    Ok(out)
}

pub struct UniProtCollector {
    cfg: UniProtConfig,
}

impl UniProtCollector {
    pub fn new(cfg: UniProtConfig) -> Self {
        Self { cfg }
    }

    /// Fetch notes not yet in the cache. Returns the last network failure so
    /// the caller can tell an outage apart from a format change.
    async fn fill_cache(&self, http: &HttpClient, cache: &RawCache, releases: &[ReleaseId]) -> Option<FetchError> {
        let mut last_err = None;
        let mut fetched = 0usize;
        for release in releases {
            let name = release.notes_file_name();
            if cache.contains(&name) {
                continue;
            }
            let url = join_url(&self.cfg.releases_url, &format!("{}/relnotes.txt", release.dir_name()));
            match http.get_text(&url).await {
                Ok(text) => match cache.write_text(&name, &text) {
                    Ok(()) => fetched += 1,
                    Err(e) => {
                        tracing::warn!(source = SOURCE_ID, %release, error = %e, "could not cache release notes");
                        last_err = Some(FetchError::Cache(e));
                    }
                },
                Err(e) => {
                    tracing::warn!(source = SOURCE_ID, %release, error = %e, "release notes fetch failed");
                    last_err = Some(e);
                }
            }
        }
        tracing::debug!(source = SOURCE_ID, fetched, "release notes cache filled");
        last_err
    }

    /// Live total from the `X-Total-Results` header; `None` when unavailable.
    async fn current_total(&self, http: &HttpClient) -> Option<u64> {
        let url = self.cfg.rest_url.as_str();
        let resp = http
            .send(url, |c| {
                c.get(url)
                    .query(&[("query", "*"), ("size", "0")])
                    .header(reqwest::header::ACCEPT, "application/json")
            })
            .await;
        match resp {
            Ok(resp) => {
                let total = resp
                    .headers()
                    .get(TOTAL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                if total.is_none() {
                    tracing::warn!(source = SOURCE_ID, "search response has no X-Total-Results header");
                }
                total
            }
            Err(e) => {
                tracing::warn!(source = SOURCE_ID, error = %e, "could not fetch current total");
                None
            }
        }
    }
}

#[async_trait]
impl SourceCollector for UniProtCollector {
    type Raw = UniProtRaw;

    fn series_basis(&self) -> SeriesBasis {
        SeriesBasis::Snapshots
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: SOURCE_ID.to_string(),
            name: "UniProt".to_string(),
            description: "Universal Protein Resource - comprehensive protein sequences".to_string(),
            url: "https://www.uniprot.org/uniprotkb/statistics".to_string(),
            color: "#f59e0b".to_string(),
            icon: Some("chain".to_string()),
        }
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<UniProtRaw, FetchError> {
        let listing = ctx.http.get_text(&self.cfg.releases_url).await?;
        let selected = latest_per_year(&list_releases(&listing), self.cfg.first_year);
        if selected.is_empty() {
            return Err(FetchError::upstream("release listing has no release-YYYY_MM folders"));
        }

        let cache = ctx.raw_cache(SOURCE_ID);
        let fetch_err = self.fill_cache(&ctx.http, &cache, &selected).await;
        let parsed = match (releases_from_cache(&cache, &selected), fetch_err) {
            (Ok(p), _) => p,
            // Nothing parsed because nothing could be downloaded.
            (Err(_), Some(net @ FetchError::Network(_))) => return Err(net),
            (Err(e), _) => return Err(e),
        };

        Ok(UniProtRaw {
            skipped: parsed.skipped.len(),
            releases: parsed.records,
            current_total: self.current_total(&ctx.http).await,
            current_year: ctx.now.year(),
        })
    }

    fn transform(&self, raw: UniProtRaw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError> {
        let mut snapshots = latest_per_period(
            raw.releases
                .iter()
                .filter_map(|r| r.release.period().map(|k| (k, r.entries as f64))),
        );

        if let (Some(total), Some(key)) = (raw.current_total, PeriodKey::year(raw.current_year)) {
            let total = total as f64;
            let historical_max = snapshots.values().copied().fold(0.0, f64::max);
            if total >= historical_max {
                let slot = snapshots.entry(key).or_insert(total);
                *slot = slot.max(total);
            } else {
                tracing::warn!(
                    source = SOURCE_ID,
                    total,
                    historical_max,
                    "live total below archived releases; not used"
                );
            }
        }

        let current = snapshots
            .values()
            .next_back()
            .copied()
            .ok_or_else(|| FetchError::upstream("uniprot: no release counts to chart"))?;
        let series = series_from_snapshots("sequences", &snapshots);

        Ok(CollectorOutput {
            source: self.source_info(),
            metrics: vec![Metric::new(
                "sequences",
                "Protein Sequences",
                "sequences",
                current,
                Notation::Millions,
                "Total protein sequences in UniProtKB",
            )],
            timeseries: vec![series],
            metadata: OutputMetadata {
                last_updated: fetched_at,
                update_frequency: "monthly".to_string(),
                data_license: Some("CC BY 4.0".to_string()),
            },
        })
    }
}
