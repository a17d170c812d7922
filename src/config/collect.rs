// src/config/collect.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "COLLECT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/collect.toml";

fn default_data_dir() -> PathBuf {
    PathBuf::from("site/data")
}
fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u8 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_drift_tolerance() -> f64 {
    0.005
}

/// Run-wide settings, loaded from `config/collect.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Where `manifest.json` and `<source>.json` are published.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Transient raw payload cache, one sub-directory per source.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attempts per request, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Relative gap tolerated between `current_value` and the last cumulative point.
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,
    /// Sources whose failure makes the whole run fail.
    #[serde(default)]
    pub critical_sources: Vec<String>,
    /// Prometheus textfile written at the end of a run.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,

    #[serde(default)]
    pub sra: SraConfig,
    #[serde(default)]
    pub cellxgene: CellxGeneConfig,
    #[serde(default)]
    pub pdb: PdbConfig,
    #[serde(default)]
    pub genbank: GenBankConfig,
    #[serde(default)]
    pub uniprot: UniProtConfig,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            raw_dir: default_raw_dir(),
            request_timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            drift_tolerance: default_drift_tolerance(),
            critical_sources: Vec::new(),
            metrics_textfile: None,
            sra: SraConfig::default(),
            cellxgene: CellxGeneConfig::default(),
            pdb: PdbConfig::default(),
            genbank: GenBankConfig::default(),
            uniprot: UniProtConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SraConfig {
    pub api_base: String,
    /// Billing project; falls back to `$BIGQUERY_PROJECT`.
    pub project: Option<String>,
    /// Name of the env var holding an OAuth access token.
    pub token_env: String,
    pub page_size: u32,
}

impl Default for SraConfig {
    fn default() -> Self {
        Self {
            api_base: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            project: None,
            token_env: "BIGQUERY_ACCESS_TOKEN".to_string(),
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CellxGeneConfig {
    pub collections_url: String,
    /// Census summary rows (`label`/`value`); provides `unique_cell_count`.
    /// The source is unconfigured without it.
    pub summary_url: Option<String>,
    pub crossref_url: String,
    pub doi_cache_path: PathBuf,
    pub doi_concurrency: usize,
}

impl Default for CellxGeneConfig {
    fn default() -> Self {
        Self {
            collections_url: "https://api.cellxgene.cziscience.com/curation/v1/collections"
                .to_string(),
            summary_url: None,
            crossref_url: "https://api.crossref.org/works".to_string(),
            doi_cache_path: PathBuf::from("data/cellxgene_doi_cache.json"),
            doi_concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdbConfig {
    pub search_url: String,
    pub first_year: i32,
}

impl Default for PdbConfig {
    fn default() -> Self {
        Self {
            search_url: "https://search.rcsb.org/rcsbsearch/v2/query".to_string(),
            first_year: 1976,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenBankConfig {
    pub stats_url: String,
}

impl Default for GenBankConfig {
    fn default() -> Self {
        Self {
            stats_url: "https://www.ncbi.nlm.nih.gov/genbank/statistics/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniProtConfig {
    /// Directory listing of `release-YYYY_MM/` folders.
    pub releases_url: String,
    pub rest_url: String,
    pub first_year: i32,
}

impl Default for UniProtConfig {
    fn default() -> Self {
        Self {
            releases_url: "https://ftp.uniprot.org/pub/databases/uniprot/previous_releases/"
                .to_string(),
            rest_url: "https://rest.uniprot.org/uniprotkb/search".to_string(),
            first_year: 2011,
        }
    }
}

impl CollectConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading collect config from {}", path.display()))?;
        let mut cfg: CollectConfig = toml::from_str(&data)
            .with_context(|| format!("parsing collect config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Resolve config using env var + fallbacks:
    /// 1) explicit path (CLI flag)
    /// 2) $COLLECT_CONFIG_PATH
    /// 3) config/collect.toml
    /// 4) built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from_file(p);
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        Ok(Self::default())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn is_critical(&self, source_id: &str) -> bool {
        self.critical_sources.iter().any(|s| s == source_id)
    }

    fn sanitize(&mut self) {
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_timeout_secs();
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if !(0.0..1.0).contains(&self.drift_tolerance) {
            self.drift_tolerance = default_drift_tolerance();
        }
        if self.cellxgene.doi_concurrency == 0 {
            self.cellxgene.doi_concurrency = 1;
        }
        if self.sra.page_size == 0 {
            self.sra.page_size = SraConfig::default().page_size;
        }
        self.critical_sources = self
            .critical_sources
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
