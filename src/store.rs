//! # Store
//! Published JSON files under `data_dir`: one `<source>.json` per source plus
//! `manifest.json`. Every write goes to a hidden temp sibling first and is then
//! renamed over the target, so a polling front-end never reads half a file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CollectError;
use crate::model::{CollectorOutput, Manifest};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Write `bytes` to `path` via temp file + rename in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.json"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.source_path(source_id).is_file()
    }

    /// Previously persisted output, `None` on first run.
    pub fn load(&self, source_id: &str) -> Result<Option<CollectorOutput>, CollectError> {
        read_json(&self.source_path(source_id))
    }

    pub fn save(&self, output: &CollectorOutput) -> Result<PathBuf, CollectError> {
        let path = self.source_path(&output.source.id);
        write_json(&path, output)?;
        Ok(path)
    }

    pub fn load_manifest(&self) -> Result<Option<Manifest>, CollectError> {
        read_json(&self.manifest_path())
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<PathBuf, CollectError> {
        let path = self.manifest_path();
        write_json(&path, manifest)?;
        Ok(path)
    }

    /// Every `*.json` data file except the manifest, sorted by name.
    pub fn source_files(&self) -> Result<Vec<PathBuf>, CollectError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CollectError::io(&self.dir, e)),
        };
        let mut out: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter(|p| p.file_name().and_then(|s| s.to_str()) != Some(MANIFEST_FILE))
            .collect();
        out.sort();
        Ok(out)
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CollectError> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CollectError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| CollectError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CollectError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| CollectError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json).map_err(|e| CollectError::io(path, e))
}
