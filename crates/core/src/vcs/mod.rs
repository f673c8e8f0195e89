//! Version-control query interface.
//!
//! The notifier never links against a git library for its queries; it shells
//! out to the `git` binary through [`GitCli`]. Everything above this module
//! talks to the [`Vcs`] trait so the reconciliation and dispatch logic can be
//! driven by an in-memory repository in tests.

pub mod client;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::VcsError;

pub use client::GitCli;

/// A single ref as reported by `git show-ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// Object id the ref points at.
    pub rev: String,
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
}

impl RefEntry {
    pub fn new(rev: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rev: rev.into(),
            name: name.into(),
        }
    }
}

/// Ordering requested from `rev-list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevOrder {
    /// Whatever order git walks in (newest first).
    #[default]
    Native,
    /// Oldest first by commit date (`--reverse --date-order`).
    ReverseDate,
}

/// Arguments for a `git rev-list` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevListQuery {
    pub roots: Vec<String>,
    pub excluding: Vec<String>,
    pub order: RevOrder,
    /// Only sort the given revisions, do not walk their ancestry.
    pub no_walk: bool,
}

impl RevListQuery {
    /// Every revision reachable from `roots`.
    pub fn reachable(roots: Vec<String>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Revisions reachable from `new` but not from `old`, oldest first.
    pub fn path(new: impl Into<String>, old: impl Into<String>) -> Self {
        Self {
            roots: vec![new.into()],
            excluding: vec![old.into()],
            order: RevOrder::ReverseDate,
            no_walk: false,
        }
    }

    /// Sort an unordered set of revisions oldest first without walking.
    pub fn sorted(revs: Vec<String>) -> Self {
        Self {
            roots: revs,
            excluding: Vec::new(),
            order: RevOrder::ReverseDate,
            no_walk: true,
        }
    }

    /// Command-line arguments after `git`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["rev-list".to_string()];
        if self.no_walk {
            args.push("--no-walk".into());
        }
        if self.order == RevOrder::ReverseDate {
            args.push("--reverse".into());
            args.push("--date-order".into());
        }
        args.extend(self.roots.iter().cloned());
        args.extend(self.excluding.iter().map(|rev| format!("^{}", rev)));
        args
    }
}

/// The flavours of `git show -s` output the notifier needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// `<subject> (<short hash>)`, used in mail subjects.
    Summary,
    /// Full medium-format header and message.
    Medium,
    /// `<short hash> <subject>`, used in head-moved summaries.
    Oneline,
}

impl ShowFormat {
    pub fn args(&self) -> &'static [&'static str] {
        match self {
            Self::Summary => &["--pretty=format:%s (%h)"],
            Self::Medium => &["--no-color", "--find-copies-harder", "--pretty=medium"],
            Self::Oneline => &["--pretty=oneline", "--abbrev-commit"],
        }
    }
}

/// What a notification diff is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffRequest {
    /// A single commit against its parent(s).
    Commit(String),
    /// Two arbitrary revisions.
    Range { first: String, last: String },
}

impl DiffRequest {
    /// Command-line arguments after `git`.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Self::Commit(_) => vec!["diff-tree".into(), "--patch-with-stat".into()],
            Self::Range { .. } => vec!["diff".into(), "--patch-with-stat".into(), "-m".into()],
        };
        args.extend(
            ["--no-color", "--find-copies-harder", "--ignore-space-at-eol"]
                .iter()
                .map(|s| s.to_string()),
        );
        match self {
            Self::Commit(rev) => args.push(rev.clone()),
            Self::Range { first, last } => {
                args.push(first.clone());
                args.push(last.clone());
            }
        }
        args
    }

    /// The command a reader can paste to reproduce the diff, without `git`.
    pub fn command_line(&self) -> String {
        self.args().join(" ")
    }
}

/// Read-only queries the notifier issues against the repository.
///
/// Every call blocks the run until it completes; a failure is fatal for the
/// whole run.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// All branch refs (`git show-ref --heads`).
    async fn list_heads(&self) -> Result<Vec<RefEntry>, VcsError>;

    /// All tag refs, annotated or not (`git show-ref --tags`).
    async fn list_tags(&self) -> Result<Vec<RefEntry>, VcsError>;

    /// Object type of `rev` (`commit`, `tag`, ...).
    async fn object_type(&self, rev: &str) -> Result<String, VcsError>;

    async fn rev_list(&self, query: &RevListQuery) -> Result<Vec<String>, VcsError>;

    /// `git show -s` for a single revision.
    async fn show(&self, rev: &str, format: ShowFormat) -> Result<String, VcsError>;

    /// Short names of the branches containing `rev`.
    async fn branches_containing(&self, rev: &str) -> Result<Vec<String>, VcsError>;

    /// Write the diff for `request` into the file at `out`.
    async fn write_diff(&self, request: &DiffRequest, out: &Path) -> Result<(), VcsError>;

    /// `git config --get <key>`; `None` when unset or empty.
    async fn config_get(&self, key: &str) -> Result<Option<String>, VcsError>;
}

/// Split command output into trimmed, non-empty lines.
pub fn output_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
