//! Line-based snapshot file.
//!
//! ```text
//! head <name> <rev>
//! tag <name> <rev>
//! rev <revid>
//! diff <diffid>
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. The format is shared
//! with earlier releases of the notifier, so it must not change.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::Snapshot;
use crate::errors::StateError;

/// One decoded line of the snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Head { name: String, rev: String },
    Tag { name: String, rev: String },
    Rev(String),
    Diff(String),
}

impl Record {
    /// Decode a single line. Returns `Ok(None)` for blank and comment lines.
    pub fn parse(line_no: usize, line: &str) -> Result<Option<Self>, StateError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let malformed = || StateError::MalformedRecord {
            kind: fields[0].to_string(),
            line: line_no,
            content: line.to_string(),
        };

        let record = match fields[0] {
            "head" | "tag" => {
                let [_, name, rev] = fields[..] else {
                    return Err(malformed());
                };
                let (name, rev) = (name.to_string(), rev.to_string());
                if fields[0] == "head" {
                    Self::Head { name, rev }
                } else {
                    Self::Tag { name, rev }
                }
            }
            "rev" | "diff" => {
                let [_, id] = fields[..] else {
                    return Err(malformed());
                };
                if fields[0] == "rev" {
                    Self::Rev(id.to_string())
                } else {
                    Self::Diff(id.to_string())
                }
            }
            other => return Err(StateError::UnknownRecordType(other.to_string())),
        };
        Ok(Some(record))
    }

    fn apply(self, snapshot: &mut Snapshot) {
        match self {
            Self::Head { name, rev } => {
                snapshot.heads.insert(name, rev);
            }
            Self::Tag { name, rev } => {
                snapshot.tags.insert(name, rev);
            }
            Self::Rev(id) => {
                snapshot.revs.insert(id);
            }
            Self::Diff(id) => {
                snapshot.diffs.insert(id);
            }
        }
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Head { name, rev } => write!(f, "head {} {}", name, rev),
            Self::Tag { name, rev } => write!(f, "tag {} {}", name, rev),
            Self::Rev(id) => write!(f, "rev {}", id),
            Self::Diff(id) => write!(f, "diff {}", id),
        }
    }
}

/// Reads and writes the snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the previous file is moved to before an overwrite.
    pub fn backup_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Load the previous snapshot. `Ok(None)` means there is no file yet,
    /// i.e. this is the first run.
    pub fn load(&self) -> Result<Option<Snapshot>, StateError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no snapshot file");
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let snapshot = parse_snapshot(&contents)?;
        info!(
            path = %self.path.display(),
            heads = snapshot.heads.len(),
            tags = snapshot.tags.len(),
            revs = snapshot.revs.len(),
            "loaded previous snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Persist `snapshot`, rotating any existing file to `<path>.bak` first.
    /// A failed rotation is logged and otherwise ignored.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        if self.path.exists() {
            let backup = self.backup_path();
            if let Err(e) = std::fs::rename(&self.path, &backup) {
                warn!(backup = %backup.display(), error = %e, "could not rotate snapshot backup");
            }
        }

        std::fs::write(&self.path, render_snapshot(snapshot))?;
        info!(path = %self.path.display(), revs = snapshot.revs.len(), "saved snapshot");
        Ok(())
    }
}

fn parse_snapshot(contents: &str) -> Result<Snapshot, StateError> {
    let mut snapshot = Snapshot::new();
    for (idx, line) in contents.lines().enumerate() {
        if let Some(record) = Record::parse(idx + 1, line)? {
            record.apply(&mut snapshot);
        }
    }
    Ok(snapshot)
}

fn render_snapshot(snapshot: &Snapshot) -> String {
    let records = snapshot
        .heads
        .iter()
        .map(|(name, rev)| Record::Head {
            name: name.clone(),
            rev: rev.clone(),
        })
        .chain(snapshot.tags.iter().map(|(name, rev)| Record::Tag {
            name: name.clone(),
            rev: rev.clone(),
        }))
        .chain(snapshot.revs.iter().cloned().map(Record::Rev))
        .chain(snapshot.diffs.iter().cloned().map(Record::Diff));

    let mut out = String::new();
    for record in records {
        let _ = writeln!(out, "{}", record);
    }
    out
}
