// src/collect/providers/genbank.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::collect::{CollectContext, SourceCollector};
use crate::config::collect::GenBankConfig;
use crate::error::FetchError;
use crate::format::Notation;
use crate::merge::SeriesBasis;
use crate::model::{CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo};
use crate::parse::html::{tables, HtmlTable};
use crate::parse::parse_count;
use crate::transform::{latest_per_period, series_from_snapshots};

pub const SOURCE_ID: &str = "genbank";
const PAGE_FILE: &str = "statistics.html";

/// One row of the release statistics table: cumulative totals at a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenBankRelease {
    pub release: String,
    pub date: String,
    pub year: i32,
    pub bases: u64,
    #[serde(default)]
    pub sequences: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenBankRaw {
    pub releases: Vec<GenBankRelease>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrowthTable {
    pub releases: Vec<GenBankRelease>,
    /// Rows that looked like data but could not be read, with the reason.
    pub skipped: Vec<String>,
}

/// Find the release/date/bases table on the statistics page and read it.
/// The first table with a "base" column that yields at least one release wins.
pub fn parse_growth_table(html: &str) -> GrowthTable {
    let mut fallback = GrowthTable::default();
    for table in tables(html) {
        if table.column("base").is_none() {
            continue;
        }
        let parsed = read_table(&table);
        if !parsed.releases.is_empty() {
            return parsed;
        }
        fallback.skipped.extend(parsed.skipped);
    }
    fallback
}

fn read_table(table: &HtmlTable) -> GrowthTable {
    static RE_YEAR: OnceCell<Regex> = OnceCell::new();
    let re_year = RE_YEAR.get_or_init(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());

    let bases_col = table.column("base").unwrap_or(2);
    let seq_col = table.column("sequence");

    let mut out = GrowthTable::default();
    for row in &table.rows {
        if row.len() < 3 || bases_col >= row.len() {
            out.skipped.push(format!("short row {row:?}"));
            continue;
        }
        let date = &row[1];
        let Some(year) = re_year.find(date).and_then(|m| m.as_str().parse::<i32>().ok()) else {
            out.skipped.push(format!("no year in date {date:?}"));
            continue;
        };
        let Some(bases) = parse_count(&row[bases_col]) else {
            out.skipped.push(format!("unreadable bases {:?}", row[bases_col]));
            continue;
        };
        let sequences = seq_col
            .filter(|&i| i != bases_col)
            .and_then(|i| row.get(i))
            .and_then(|s| parse_count(s));
        out.releases.push(GenBankRelease {
            release: row[0].clone(),
            date: date.clone(),
            year,
            bases,
            sequences,
        });
    }
    out
}

pub struct GenBankCollector {
    cfg: GenBankConfig,
}

impl GenBankCollector {
    pub fn new(cfg: GenBankConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl SourceCollector for GenBankCollector {
    type Raw = GenBankRaw;

    fn series_basis(&self) -> SeriesBasis {
        SeriesBasis::Snapshots
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: SOURCE_ID.to_string(),
            name: "GenBank".to_string(),
            description: "NCBI's annotated collection of nucleotide sequences".to_string(),
            url: "https://www.ncbi.nlm.nih.gov/genbank/statistics/".to_string(),
            color: "#8b5cf6".to_string(),
            icon: Some("dna".to_string()),
        }
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<GenBankRaw, FetchError> {
        let html = ctx.http.get_text(&self.cfg.stats_url).await?;
        ctx.raw_cache(SOURCE_ID).write_text(PAGE_FILE, &html)?;

        let table = parse_growth_table(&html);
        for reason in &table.skipped {
            tracing::debug!(source = SOURCE_ID, %reason, "skipped statistics row");
        }
        if table.releases.is_empty() {
            return Err(FetchError::upstream(
                "genbank statistics page has no readable release/bases table",
            ));
        }
        tracing::info!(
            source = SOURCE_ID,
            releases = table.releases.len(),
            skipped = table.skipped.len(),
            "parsed release statistics"
        );
        Ok(GenBankRaw {
            releases: table.releases,
        })
    }

    fn transform(&self, raw: GenBankRaw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError> {
        // Later releases of a year carry the larger total.
        let snapshots = latest_per_period(
            raw.releases
                .iter()
                .filter_map(|r| PeriodKey::year(r.year).map(|k| (k, r.bases as f64))),
        );
        let current = snapshots
            .values()
            .next_back()
            .copied()
            .ok_or_else(|| FetchError::upstream("genbank: no releases to chart"))?;
        let series = series_from_snapshots("bases", &snapshots);

        Ok(CollectorOutput {
            source: self.source_info(),
            metrics: vec![Metric::new(
                "bases",
                "Total Bases",
                "bases",
                current,
                Notation::Terabases,
                "Total annotated nucleotide bases in GenBank",
            )],
            timeseries: vec![series],
            metadata: OutputMetadata {
                last_updated: fetched_at,
                update_frequency: "bimonthly".to_string(),
                data_license: Some("Public Domain".to_string()),
            },
        })
    }
}
