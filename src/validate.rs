// src/validate.rs
//! Invariant checks run before anything is persisted, and by the `validate`
//! subcommand over already published files.

use std::fs;
use std::path::PathBuf;

use crate::error::{CollectError, ValidationError};
use crate::model::{CollectorOutput, Metric, Timeseries, MANIFEST_VERSION};
use crate::store::DataStore;

/// Float slack for running-sum comparisons.
fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Sorted, unique keys; `cumulative[i] == cumulative[i-1] + value[i]`;
/// cumulative never negative and never decreasing.
pub fn check_series(ts: &Timeseries) -> Result<(), ValidationError> {
    let metric = || ts.metric_id.clone();
    if ts.data.is_empty() {
        return Err(ValidationError::EmptySeries { metric: metric() });
    }

    let mut prev: Option<&crate::model::TimeseriesPoint> = None;
    for p in &ts.data {
        let expected = prev.map_or(p.value, |q| q.cumulative + p.value);
        if let Some(q) = prev {
            if p.date <= q.date {
                return Err(ValidationError::Unsorted {
                    metric: metric(),
                    previous: q.date,
                    period: p.date,
                });
            }
        }
        if !close(p.cumulative, expected) {
            return Err(ValidationError::RunningSum {
                metric: metric(),
                period: p.date,
                cumulative: p.cumulative,
                expected,
            });
        }
        if p.cumulative < 0.0 {
            return Err(ValidationError::NegativeCumulative {
                metric: metric(),
                period: p.date,
                cumulative: p.cumulative,
            });
        }
        if p.value < 0.0 {
            return Err(ValidationError::NonMonotonic {
                metric: metric(),
                period: p.date,
                value: p.value,
            });
        }
        prev = Some(p);
    }
    Ok(())
}

/// Compare the displayed total with the charted total. Returns the divergence
/// when it exceeds `tolerance` (relative to the larger of the two).
pub fn check_drift(metric: &Metric, ts: &Timeseries, tolerance: f64) -> Option<ValidationError> {
    let charted = ts.last_cumulative()?;
    let current = metric.current_value;
    let scale = current.abs().max(charted.abs());
    if scale == 0.0 {
        return None;
    }
    let ratio = (current - charted).abs() / scale;
    (ratio > tolerance).then(|| ValidationError::Drift {
        metric: metric.id.clone(),
        current,
        charted,
        ratio,
    })
}

/// Structural checks are fatal; drift findings come back as warnings.
pub fn validate_output(
    output: &CollectorOutput,
    drift_tolerance: f64,
) -> Result<Vec<ValidationError>, ValidationError> {
    let mut warnings = Vec::new();
    for ts in &output.timeseries {
        let Some(metric) = output.metric(&ts.metric_id) else {
            return Err(ValidationError::OrphanSeries {
                metric: ts.metric_id.clone(),
            });
        };
        check_series(ts)?;
        if let Some(w) = check_drift(metric, ts, drift_tolerance) {
            warnings.push(w);
        }
    }
    Ok(warnings)
}

/// Findings for one published data file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAudit {
    pub path: PathBuf,
    pub problems: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreAudit {
    pub files: Vec<FileAudit>,
    pub manifest_problems: Vec<String>,
}

impl StoreAudit {
    pub fn is_valid(&self) -> bool {
        !self.files.is_empty()
            && self.manifest_problems.is_empty()
            && self.files.iter().all(|f| f.problems.is_empty())
    }
}

/// Re-check everything under `data_dir`: every data file must deserialize into
/// the output schema, be named after its source id and satisfy the series
/// invariants; the manifest must only list sources that have a file.
pub fn audit_store(store: &DataStore, drift_tolerance: f64) -> Result<StoreAudit, CollectError> {
    let mut audit = StoreAudit::default();

    for path in store.source_files()? {
        let mut file = FileAudit {
            path: path.clone(),
            problems: Vec::new(),
            warnings: Vec::new(),
        };
        let content = fs::read_to_string(&path).map_err(|e| CollectError::io(&path, e))?;
        match serde_json::from_str::<CollectorOutput>(&content) {
            Err(e) => file.problems.push(format!("does not match the output schema: {e}")),
            Ok(output) => {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                if stem != output.source.id {
                    file.problems
                        .push(format!("file name does not match source id {:?}", output.source.id));
                }
                match validate_output(&output, drift_tolerance) {
                    Ok(warnings) => file.warnings.extend(warnings.iter().map(ToString::to_string)),
                    Err(e) => file.problems.push(e.to_string()),
                }
            }
        }
        audit.files.push(file);
    }

    match store.load_manifest() {
        Ok(None) => audit.manifest_problems.push("manifest.json is missing".to_string()),
        Err(e) => audit.manifest_problems.push(e.to_string()),
        Ok(Some(m)) => {
            if m.version != MANIFEST_VERSION {
                audit
                    .manifest_problems
                    .push(format!("unsupported manifest version {:?}", m.version));
            }
            for id in &m.sources {
                if !store.has_source(id) {
                    audit
                        .manifest_problems
                        .push(format!("lists {id:?} but {id}.json does not exist"));
                }
            }
        }
    }
    Ok(audit)
}
