// src/collect/providers/sra.rs
//! SRA sequenced bases per release year, via the BigQuery REST API
//! (`jobs.query`, then `jobs.getQueryResults` for further pages).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collect::http::{join_url, parse_json, read_text, HttpClient};
use crate::collect::{CollectContext, SourceCollector};
use crate::config::collect::SraConfig;
use crate::error::FetchError;
use crate::format::Notation;
use crate::model::{CollectorOutput, Metric, OutputMetadata, PeriodKey, SourceInfo};
use crate::transform::{bucket, series_from_increments};

pub const SOURCE_ID: &str = "sra";
const PROJECT_ENV: &str = "BIGQUERY_PROJECT";
/// Hard stop for a job that never completes or pages forever.
const MAX_PAGES: usize = 200;
const QUERY_TIMEOUT_MS: u64 = 60_000;

pub const SRA_QUERY: &str = "\
SELECT
    EXTRACT(YEAR FROM releasedate) AS year,
    SUM(mbases) AS megabases,
    COUNT(*) AS run_count
FROM `nih-sra-datastore.sra.metadata`
WHERE releasedate IS NOT NULL
    AND mbases IS NOT NULL
    AND mbases > 0
GROUP BY year
ORDER BY year";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<BqRow>,
    page_token: Option<String>,
    /// Int64 values travel as JSON strings.
    total_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BqRow {
    f: Vec<BqCell>,
}

#[derive(Debug, Deserialize)]
struct BqCell {
    v: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SraYear {
    pub year: i32,
    pub megabases: f64,
    pub run_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SraRaw {
    pub years: Vec<SraYear>,
}

fn cell_str(cell: Option<&BqCell>) -> Option<String> {
    match cell?.v.as_ref()? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_row(row: &BqRow) -> Result<SraYear, FetchError> {
    let bad = || FetchError::upstream(format!("unexpected BigQuery row: {row:?}"));
    let year = cell_str(row.f.first())
        .and_then(|s| s.parse::<i32>().ok())
        .ok_or_else(bad)?;
    let megabases = cell_str(row.f.get(1))
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(bad)?;
    let run_count = cell_str(row.f.get(2))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    Ok(SraYear {
        year,
        megabases,
        run_count,
    })
}

pub struct SraCollector {
    cfg: SraConfig,
}

impl SraCollector {
    pub fn new(cfg: SraConfig) -> Self {
        Self { cfg }
    }

    fn credentials(&self) -> Result<(String, String), FetchError> {
        let token = std::env::var(&self.cfg.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| FetchError::Unconfigured(format!("${} is not set", self.cfg.token_env)))?;
        let project = self
            .cfg
            .project
            .clone()
            .or_else(|| std::env::var(PROJECT_ENV).ok())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                FetchError::Unconfigured(format!("no BigQuery project (sra.project or ${PROJECT_ENV})"))
            })?;
        Ok((token, project))
    }

    async fn first_page(&self, http: &HttpClient, token: &str, project: &str) -> Result<QueryPage, FetchError> {
        let url = join_url(&self.cfg.api_base, &format!("projects/{project}/queries"));
        let req = QueryRequest {
            query: SRA_QUERY,
            use_legacy_sql: false,
            max_results: self.cfg.page_size,
            timeout_ms: QUERY_TIMEOUT_MS,
        };
        let resp = http
            .send(&url, |c| c.post(&url).bearer_auth(token).json(&req))
            .await?;
        parse_json(&url, &read_text(&url, resp).await?)
    }

    async fn next_page(
        &self,
        http: &HttpClient,
        token: &str,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryPage, FetchError> {
        let url = join_url(
            &self.cfg.api_base,
            &format!("projects/{}/queries/{}", job.project_id, job.job_id),
        );
        let mut params: Vec<(&str, String)> = vec![
            ("maxResults", self.cfg.page_size.to_string()),
            ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
        ];
        if let Some(t) = page_token {
            params.push(("pageToken", t.to_string()));
        }
        if let Some(loc) = &job.location {
            params.push(("location", loc.clone()));
        }
        let resp = http
            .send(&url, |c| c.get(&url).bearer_auth(token).query(&params))
            .await?;
        parse_json(&url, &read_text(&url, resp).await?)
    }
}

#[async_trait]
impl SourceCollector for SraCollector {
    type Raw = SraRaw;

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            id: SOURCE_ID.to_string(),
            name: "Sequence Read Archive".to_string(),
            description: "NCBI's archive of high-throughput sequencing data".to_string(),
            url: "https://www.ncbi.nlm.nih.gov/sra/docs/sragrowth/".to_string(),
            color: "#2563eb".to_string(),
            icon: Some("microbe".to_string()),
        }
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<SraRaw, FetchError> {
        let (token, project) = self.credentials()?;
        let mut page = self.first_page(&ctx.http, &token, &project).await?;
        let mut years = Vec::new();
        let mut total_rows: Option<u64> = None;

        let mut pages = 1usize;
        loop {
            if page.job_complete {
                for row in &page.rows {
                    years.push(parse_row(row)?);
                }
                total_rows = total_rows.or_else(|| page.total_rows.as_deref().and_then(|t| t.parse().ok()));
                if page.page_token.is_none() {
                    break;
                }
            }
            if pages >= MAX_PAGES {
                return Err(FetchError::upstream(format!(
                    "BigQuery job did not finish within {MAX_PAGES} pages"
                )));
            }
            let job = page
                .job_reference
                .as_ref()
                .ok_or_else(|| FetchError::upstream("BigQuery response has no jobReference"))?;
            let page_token = if page.job_complete { page.page_token.as_deref() } else { None };
            page = self.next_page(&ctx.http, &token, job, page_token).await?;
            pages += 1;
        }

        if years.is_empty() {
            return Err(FetchError::upstream("BigQuery returned no rows"));
        }
        if let Some(expected) = total_rows {
            if years.len() as u64 != expected {
                return Err(FetchError::upstream(format!(
                    "BigQuery returned {} of {expected} rows",
                    years.len()
                )));
            }
        }
        Ok(SraRaw { years })
    }

    fn transform(&self, raw: SraRaw, fetched_at: DateTime<Utc>) -> Result<CollectorOutput, FetchError> {
        // Megabases -> bases.
        let rows = raw
            .years
            .iter()
            .filter(|y| y.megabases > 0.0)
            .filter_map(|y| PeriodKey::year(y.year).map(|k| (k, y.megabases * 1e6)));
        let series = series_from_increments("bases", &bucket(rows));
        let total = series
            .last_cumulative()
            .ok_or_else(|| FetchError::upstream("sra: no yearly totals"))?;

        Ok(CollectorOutput {
            source: self.source_info(),
            metrics: vec![Metric::new(
                "bases",
                "Total Bases",
                "bases",
                total,
                Notation::Petabases,
                "Total sequenced bases in SRA",
            )],
            timeseries: vec![series],
            metadata: OutputMetadata {
                last_updated: fetched_at,
                update_frequency: "weekly".to_string(),
                data_license: Some("Public Domain".to_string()),
            },
        })
    }
}
