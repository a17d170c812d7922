// src/collect/providers/pdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::collect::http::{parse_json, read_text, HttpClient};
use crate::collect::{CollectContext, SourceCollector};
use crate::config::collect::PdbConfig;
use crate::error::FetchError;
use crate::format::Notation;
use crate::model::{CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo};
use crate::transform::{bucket, series_from_increments};

pub const SOURCE_ID: &str = "pdb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdbYearCount {
    pub year: i32,
    pub count: u64,
}

/// Structures first released per calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdbRaw {
    pub years: Vec<PdbYearCount>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: Option<u64>,
}

pub struct PdbCollector {
    cfg: PdbConfig,
}

impl PdbCollector {
    pub fn new(cfg: PdbConfig) -> Self {
        Self { cfg }
    }

    /// Count-only search (`rows: 0`) over one year of initial release dates.
    pub fn year_query(year: i32) -> Value {
        json!({
            "query": {
                "type": "terminal",
                "service": "text",
                "parameters": {
                    "attribute": "rcsb_accession_info.initial_release_date",
                    "operator": "range",
                    "value": {
                        "from": format!("{year}-01-01"),
                        "to": format!("{year}-12-31"),
                        "include_lower": true,
                        "include_upper": true
                    }
                }
            },
            "return_type": "entry",
            "request_options": {
                "return_all_hits": false,
                "results_content_type": ["experimental"],
                "paginate": { "start": 0, "rows": 0 }
            }
        })
    }

    async fn count_for_year(&self, http: &HttpClient, year: i32) -> Result<u64, FetchError> {
        let url = self.cfg.search_url.as_str();
        let body = Self::year_query(year);
        let resp = http.send(url, |c| c.post(url).json(&body)).await?;
        // The search service answers 204 when nothing matches.
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        let text = read_text(url, resp).await?;
        let parsed: SearchResponse = parse_json(url, &text)?;
        parsed
            .total_count
            .ok_or_else(|| FetchError::upstream(format!("rcsb search {year}: no total_count in response")))
    }
}

#[async_trait]
impl SourceCollector for PdbCollector {
    type Raw = PdbRaw;

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: SOURCE_ID.to_string(),
            name: "Protein Data Bank".to_string(),
            description: "3D structures of proteins, nucleic acids, and complex assemblies"
                .to_string(),
            url: "https://www.rcsb.org/stats/growth".to_string(),
            color: "#ef4444".to_string(),
            icon: Some("crystal".to_string()),
        }
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<PdbRaw, FetchError> {
        let last_year = ctx.now.year();
        let mut years = Vec::new();
        for year in self.cfg.first_year..=last_year {
            // A missing year would shift every later cumulative point.
            let count = self.count_for_year(&ctx.http, year).await.map_err(|e| {
                tracing::warn!(source = SOURCE_ID, year, error = %e, "year count failed");
                e
            })?;
            tracing::debug!(source = SOURCE_ID, year, count, "year counted");
            years.push(PdbYearCount { year, count });
        }

        if years.iter().all(|y| y.count == 0) {
            return Err(FetchError::upstream("rcsb search returned no structures for any year"));
        }
        Ok(PdbRaw { years })
    }

    fn transform(&self, raw: PdbRaw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError> {
        let rows = raw
            .years
            .iter()
            .filter_map(|y| PeriodKey::year(y.year).map(|k| (k, y.count as f64)));
        let series = series_from_increments("structures", &bucket(rows));
        let total = series
            .last_cumulative()
            .ok_or_else(|| FetchError::upstream("pdb: no yearly counts"))?;

        Ok(CollectorOutput {
            source: self.source_info(),
            metrics: vec![Metric::new(
                "structures",
                "Protein Structures",
                "structures",
                total,
                Notation::Suffix,
                "Total 3D macromolecular structures",
            )],
            timeseries: vec![series],
            metadata: OutputMetadata {
                last_updated: fetched_at,
                update_frequency: "weekly".to_string(),
                data_license: Some("CC0 1.0".to_string()),
            },
        })
    }
}
