// src/manifest.rs
//! Builds `manifest.json` at the end of a run.
//!
//! Sources are listed in registry order. A source is listed when it succeeded
//! this run, or when it failed but was listed before and its data file is still
//! readable (the dashboard keeps showing the last good data). Sources that
//! were not attempted this run (`--only`) are listed whenever their file is
//! readable. A previously listed source that ends up unlisted is reported as
//! dropped, which fails the run.

use chrono::{DateTime, Utc};

use crate::model::{Manifest, MANIFEST_VERSION};
use crate::store::DataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Collected (or retained after a refused merge); timestamp of the persisted output.
    Succeeded(DateTime<Utc>),
    Failed,
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestUpdate {
    pub manifest: Manifest,
    /// Previously listed sources that are no longer listed.
    pub dropped: Vec<String>,
    /// Failed or skipped sources kept from their existing file.
    pub retained: Vec<String>,
}

pub fn build_manifest(
    store: &DataStore,
    previous: Option<&Manifest>,
    entries: &[(String, EntryState)],
    now: DateTime<Utc>,
) -> ManifestUpdate {
    let was_listed = |id: &str| previous.is_some_and(|m| m.lists(id));

    let mut sources = Vec::new();
    let mut retained = Vec::new();
    let mut dropped = Vec::new();
    let mut last_updated: Option<DateTime<Utc>> = None;

    for (id, state) in entries {
        let listed_at = match state {
            EntryState::Succeeded(ts) => Some(*ts),
            EntryState::Failed if !was_listed(id) => None,
            EntryState::Failed | EntryState::NotAttempted => {
                let kept = persisted_timestamp(store, id);
                if kept.is_some() {
                    retained.push(id.clone());
                }
                kept
            }
        };

        match listed_at {
            Some(ts) => {
                sources.push(id.clone());
                last_updated = Some(last_updated.map_or(ts, |cur| cur.max(ts)));
            }
            None if was_listed(id) => dropped.push(id.clone()),
            None => {}
        }
    }

    if let Some(prev) = previous {
        for id in prev.sources.iter().filter(|id| !entries.iter().any(|(e, _)| e == *id)) {
            tracing::info!(source = %id, "unregistered source removed from manifest");
        }
    }

    ManifestUpdate {
        manifest: Manifest {
            version: MANIFEST_VERSION.to_string(),
            generated: Some(now),
            last_updated,
            sources,
        },
        dropped,
        retained,
    }
}

fn persisted_timestamp(store: &DataStore, id: &str) -> Option<DateTime<Utc>> {
    match store.load(id) {
        Ok(Some(output)) => Some(output.metadata.last_updated),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(source = %id, error = %e, "persisted file unreadable; not listed");
            None
        }
    }
}
