// src/pipeline.rs
//! One collection run: every selected collector is fetched, merged with its
//! persisted history, validated and written, in registry order. A failing
//! source is recorded in the [`RunReport`] and never stops the others. The
//! manifest is rewritten last.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};

use crate::collect::registry::SOURCE_IDS;
use crate::collect::{ensure_metrics_described, CollectContext, Collector};
use crate::config::CollectConfig;
use crate::error::{CollectError, FetchError};
use crate::manifest::{build_manifest, EntryState};
use crate::merge::merge;
use crate::model::Manifest;
use crate::store::DataStore;
use crate::validate::validate_output;

#[derive(Debug)]
pub enum SourceStatus {
    /// Merged output written to `path`.
    Updated {
        path: PathBuf,
        points: usize,
        last_updated: DateTime<Utc>,
        drift_warnings: usize,
    },
    /// Incoming fetch was empty; the persisted file was left untouched.
    Retained {
        conflict: CollectError,
        last_updated: DateTime<Utc>,
    },
    Failed(CollectError),
}

#[derive(Debug)]
pub struct SourceReport {
    pub source_id: String,
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.status, SourceStatus::Failed(_))
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            SourceStatus::Updated { last_updated, .. } | SourceStatus::Retained { last_updated, .. } => {
                Some(*last_updated)
            }
            SourceStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CollectError> {
        match &self.status {
            SourceStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("no source succeeded")]
    NothingSucceeded,
    #[error("previously published sources would be dropped: {}", .0.join(", "))]
    Dropped(Vec<String>),
    #[error("critical sources failed: {}", .0.join(", "))]
    CriticalFailed(Vec<String>),
}

#[derive(Debug)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub manifest: Manifest,
    pub dropped: Vec<String>,
    pub retained: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.sources.iter().filter(|s| s.succeeded()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| !s.succeeded())
    }

    /// Why the run counts as failed, if it does. Partial success is not a failure.
    pub fn failure(&self, is_critical: impl Fn(&str) -> bool) -> Option<RunFailure> {
        if self.succeeded() == 0 {
            return Some(RunFailure::NothingSucceeded);
        }
        if !self.dropped.is_empty() {
            return Some(RunFailure::Dropped(self.dropped.clone()));
        }
        let critical: Vec<String> = self
            .failed()
            .filter(|s| is_critical(&s.source_id))
            .map(|s| s.source_id.clone())
            .collect();
        (!critical.is_empty()).then_some(RunFailure::CriticalFailed(critical))
    }
}

pub struct Pipeline {
    store: DataStore,
    ctx: CollectContext,
    drift_tolerance: f64,
}

impl Pipeline {
    pub fn new(store: DataStore, ctx: CollectContext, drift_tolerance: f64) -> Self {
        Self {
            store,
            ctx,
            drift_tolerance,
        }
    }

    pub fn from_config(cfg: &CollectConfig, now: DateTime<Utc>) -> Result<Self, FetchError> {
        Ok(Self::new(
            DataStore::new(&cfg.data_dir),
            CollectContext::from_config(cfg, now)?,
            cfg.drift_tolerance,
        ))
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Run `collectors` and rewrite the manifest. Only a manifest write
    /// failure is returned as an error; per-source failures are in the report.
    pub async fn run(&self, collectors: &[Box<dyn Collector>]) -> Result<RunReport, CollectError> {
        ensure_metrics_described();
        counter!("collect_runs_total").increment(1);

        let previous_manifest = self.store.load_manifest().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "previous manifest unreadable; starting a new one");
            None
        });

        let mut sources = Vec::with_capacity(collectors.len());
        for collector in collectors {
            let source_id = collector.source_id();
            tracing::info!(source = %source_id, "collecting");
            let status = match self.process(collector.as_ref()).await {
                Ok(status) => status,
                Err(e) => SourceStatus::Failed(e),
            };
            match &status {
                SourceStatus::Updated { points, drift_warnings, .. } => {
                    tracing::info!(source = %source_id, points, drift_warnings, "source updated");
                }
                SourceStatus::Retained { conflict, .. } => {
                    tracing::warn!(source = %source_id, %conflict, "source retained");
                }
                SourceStatus::Failed(e) => {
                    counter!("collect_source_errors_total", "source" => source_id.clone()).increment(1);
                    tracing::error!(source = %source_id, kind = e.kind(), error = %e, "source failed");
                }
            }
            sources.push(SourceReport { source_id, status });
        }

        let entries = manifest_entries(&sources);
        let update = build_manifest(&self.store, previous_manifest.as_ref(), &entries, self.ctx.now);
        self.store.save_manifest(&update.manifest)?;
        gauge!("collect_last_run_ts").set(self.ctx.now.timestamp() as f64);

        let report = RunReport {
            sources,
            manifest: update.manifest,
            dropped: update.dropped,
            retained: update.retained,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.sources.len() - report.succeeded(),
            listed = report.manifest.sources.len(),
            "run finished"
        );
        Ok(report)
    }

    /// Fetch, merge, validate and persist one source.
    pub async fn process(&self, collector: &dyn Collector) -> Result<SourceStatus, CollectError> {
        let source_id = collector.source_id();
        // A corrupt previous file fails the source instead of being replaced.
        let previous = self.store.load(&source_id)?;

        let incoming = collector.fetch_output(&self.ctx).await?;
        if incoming.source.id != source_id {
            return Err(FetchError::upstream(format!(
                "collector {source_id} produced output for {:?}",
                incoming.source.id
            ))
            .into());
        }

        let outcome = merge(previous, incoming, collector.merge_basis());
        if let Some(conflict) = outcome.conflict() {
            return Ok(SourceStatus::Retained {
                conflict,
                last_updated: outcome.output().metadata.last_updated,
            });
        }
        let merged = outcome.into_output();

        let warnings = validate_output(&merged, self.drift_tolerance)?;
        for w in &warnings {
            tracing::warn!(source = %source_id, drift = %w, "current value and chart disagree");
        }

        let path = self.store.save(&merged)?;
        let points = merged.total_points();
        counter!("collect_points_total").increment(points as u64);
        Ok(SourceStatus::Updated {
            path,
            points,
            last_updated: merged.metadata.last_updated,
            drift_warnings: warnings.len(),
        })
    }
}

/// Registry ids first (in registry order), then any other attempted ids.
fn manifest_entries(sources: &[SourceReport]) -> Vec<(String, EntryState)> {
    let state_of = |id: &str| {
        sources
            .iter()
            .find(|s| s.source_id == id)
            .map_or(EntryState::NotAttempted, |s| {
                s.last_updated().map_or(EntryState::Failed, EntryState::Succeeded)
            })
    };
    let mut entries: Vec<(String, EntryState)> = SOURCE_IDS
        .iter()
        .map(|&id| (id.to_string(), state_of(id)))
        .collect();
    for s in sources {
        if !SOURCE_IDS.contains(&s.source_id.as_str()) {
            entries.push((s.source_id.clone(), state_of(s.source_id.as_str())));
        }
    }
    entries
}
