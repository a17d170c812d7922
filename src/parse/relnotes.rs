// src/parse/relnotes.rs
//! UniProt release notes (`relnotes.txt`).
//!
//! A text is read as a sequence of sections. A section starts at a header
//! line naming a release (`UniProtKB/Swiss-Prot Release 2024_06 ...`); lines
//! mentioning an entry count contribute to the current section, and the
//! largest count wins (the combined UniProtKB total beats the per-division
//! counts). Each section yields either a [`ReleaseRecord`] or a
//! [`SkipReason`], so a malformed file is reported and skipped instead of
//! failing the whole batch.
//!
//! Parsing is lazy: [`ReleaseNotes::records`] returns a fresh iterator each
//! time, so callers can consume parsed records and skip reasons separately.

use std::fmt;
use std::iter::Enumerate;
use std::str::{FromStr, Lines};

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::PeriodKey;

/// `YYYY_MM` identifier of a UniProt release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseId {
    pub year: i32,
    pub month: u32,
}

impl ReleaseId {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Year bucket the release is charted under.
    pub fn period(&self) -> Option<PeriodKey> {
        PeriodKey::year(self.year)
    }

    /// Folder name in the `previous_releases` listing.
    pub fn dir_name(&self) -> String {
        format!("release-{self}")
    }

    /// File name used for the cached copy of this release's notes.
    pub fn notes_file_name(&self) -> String {
        format!("{}.relnotes.txt", self.dir_name())
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid release id {0:?} (expected YYYY_MM)")]
pub struct ReleaseIdError(pub String);

impl FromStr for ReleaseId {
    type Err = ReleaseIdError;

    /// Accepts `2024_06`, `release-2024_06` and `release-2024_06/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ReleaseIdError(s.to_string());
        let t = s.trim().trim_end_matches('/');
        let t = t.strip_prefix("release-").unwrap_or(t);
        let (y, m) = t.split_once('_').ok_or_else(err)?;
        if y.len() != 4 || m.is_empty() || m.len() > 2 {
            return Err(err());
        }
        let year: i32 = y.parse().map_err(|_| err())?;
        let month: u32 = m.parse().map_err(|_| err())?;
        Self::new(year, month).ok_or_else(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub release: ReleaseId,
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The release section never mentions an entry count.
    NoEntryCount { release: ReleaseId },
    /// A count-looking token that is not a usable number.
    BadCount {
        release: Option<ReleaseId>,
        raw: String,
        line: usize,
    },
    /// A count appears before any release header and no default is known.
    CountWithoutRelease { line: usize },
    /// The notes of this release are not in the local cache.
    NotCached { release: ReleaseId },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoEntryCount { release } => {
                write!(f, "release {release}: no entry count found")
            }
            SkipReason::BadCount {
                release: Some(r),
                raw,
                line,
            } => write!(f, "release {r}: unusable count {raw:?} on line {line}"),
            SkipReason::BadCount {
                release: None,
                raw,
                line,
            } => write!(f, "unusable count {raw:?} on line {line}"),
            SkipReason::CountWithoutRelease { line } => {
                write!(f, "entry count on line {line} precedes any release header")
            }
            SkipReason::NotCached { release } => write!(f, "release {release}: notes not cached"),
        }
    }
}

pub type ParsedItem = Result<ReleaseRecord, SkipReason>;

#[derive(Debug, Clone, Copy)]
pub struct ReleaseNotes<'a> {
    text: &'a str,
    default_release: Option<ReleaseId>,
}

impl<'a> ReleaseNotes<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            default_release: None,
        }
    }

    /// Notes of a single known release; counts before any header belong to it.
    pub fn for_release(text: &'a str, release: ReleaseId) -> Self {
        Self {
            text,
            default_release: Some(release),
        }
    }

    pub fn records(&self) -> Records<'a> {
        Records {
            lines: self.text.lines().enumerate(),
            section: self.default_release.map(Section::implicit),
            queued: None,
            finished: false,
        }
    }

    pub fn parsed(&self) -> impl Iterator<Item = ReleaseRecord> + 'a {
        self.records().filter_map(Result::ok)
    }

    pub fn skipped(&self) -> impl Iterator<Item = SkipReason> + 'a {
        self.records().filter_map(Result::err)
    }
}

#[derive(Debug, Clone)]
struct Section {
    release: ReleaseId,
    best: Option<u64>,
    /// Opened from the default release rather than a header line.
    implicit: bool,
}

impl Section {
    fn implicit(release: ReleaseId) -> Self {
        Self {
            release,
            best: None,
            implicit: true,
        }
    }

    fn explicit(release: ReleaseId) -> Self {
        Self {
            release,
            best: None,
            implicit: false,
        }
    }

    /// `superseded`: closed by a header for another release, not by EOF.
    fn close(self, superseded: bool) -> Option<ParsedItem> {
        match self.best {
            Some(entries) => Some(Ok(ReleaseRecord {
                release: self.release,
                entries,
            })),
            None if self.implicit && superseded => None,
            None => Some(Err(SkipReason::NoEntryCount {
                release: self.release,
            })),
        }
    }
}

pub struct Records<'a> {
    lines: Enumerate<Lines<'a>>,
    section: Option<Section>,
    queued: Option<ParsedItem>,
    finished: bool,
}

impl Iterator for Records<'_> {
    type Item = ParsedItem;

    fn next(&mut self) -> Option<ParsedItem> {
        if let Some(item) = self.queued.take() {
            return Some(item);
        }
        if self.finished {
            return None;
        }

        loop {
            let Some((idx, line)) = self.lines.next() else {
                self.finished = true;
                return self.section.take().and_then(|s| s.close(false));
            };
            let line_no = idx + 1;

            let mut closed = None;
            if let Some(release) = header_release(line) {
                let same = self.section.as_ref().is_some_and(|s| s.release == release);
                if !same {
                    closed = self
                        .section
                        .replace(Section::explicit(release))
                        .and_then(|s| s.close(true));
                }
            }

            let counted = match entry_count(line) {
                None => None,
                Some(Ok(n)) => match self.section.as_mut() {
                    Some(s) => {
                        s.best = Some(s.best.map_or(n, |b| b.max(n)));
                        None
                    }
                    None => Some(Err(SkipReason::CountWithoutRelease { line: line_no })),
                },
                Some(Err(raw)) => Some(Err(SkipReason::BadCount {
                    release: self.section.as_ref().map(|s| s.release),
                    raw,
                    line: line_no,
                })),
            };

            match (closed, counted) {
                (Some(a), Some(b)) => {
                    self.queued = Some(b);
                    return Some(a);
                }
                (Some(a), None) | (None, Some(a)) => return Some(a),
                (None, None) => continue,
            }
        }
    }
}

fn header_release(line: &str) -> Option<ReleaseId> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:uniprot(?:kb)?|swiss-prot|trembl)\b.*?\brelease\s+(\d{4})_(\d{1,2})\b")
            .unwrap()
    });
    let caps = re.captures(line)?;
    ReleaseId::new(caps[1].parse().ok()?, caps[2].parse().ok()?)
}

/// Entry count mentioned on `line`, tried from most to least specific
/// phrasing. `Err` carries the raw token when it does not fit a `u64`.
/// UniRef and UniParc clusters are counted in entries too and are ignored.
fn entry_count(line: &str) -> Option<Result<u64, String>> {
    let lower = line.to_ascii_lowercase();
    if lower.contains("uniref") || lower.contains("uniparc") {
        return None;
    }
    static PATTERNS: OnceCell<[Regex; 3]> = OnceCell::new();
    let [combined, consists, loose] = PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(\d[\d,]*)\s+entries\s*\(UniProtKB").unwrap(),
            Regex::new(r"(?i)consists?\s+of\s+(\d[\d,]*)\s+(?:sequence\s+)?entries").unwrap(),
            Regex::new(r"(?i)(\d[\d,]*)\s*(?:sequence\s+)?entries").unwrap(),
        ]
    });

    let caps = combined
        .captures(line)
        .or_else(|| consists.captures(line))
        .or_else(|| line.contains("UniProtKB").then(|| loose.captures(line)).flatten())?;
    let raw = caps[1].to_string();
    Some(raw.replace(',', "").parse::<u64>().map_err(|_| raw))
}
