//! Repository state recorded between runs.
//!
//! A [`Snapshot`] holds the branch heads, annotated tags and reachable
//! revisions of the repository at one point in time. The previous run's
//! snapshot is loaded by [`SnapshotStore`], the current one is captured
//! fresh from the [`Vcs`], and the reconciliation engine compares the two.

pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::errors::VcsError;
use crate::vcs::{RevListQuery, Vcs};

pub use store::{Record, SnapshotStore};

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Kind of named ref a change event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Tag,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// Recorded state of the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Branch name -> revision.
    pub heads: BTreeMap<String, String>,
    /// Annotated tag name -> tag object id.
    pub tags: BTreeMap<String, String>,
    /// Every revision reachable from a head or tag.
    pub revs: BTreeSet<String>,
    /// Pseudo-revisions of manual diffs already sent.
    pub diffs: BTreeSet<String>,
    /// Revisions notified during this run. Never persisted.
    pub reported: BTreeSet<String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the current snapshot from the repository.
    ///
    /// Lightweight tags are dropped: a tag ref is kept only when the object
    /// it points at is itself a tag object.
    pub async fn capture(vcs: &dyn Vcs) -> Result<Self, VcsError> {
        let mut snapshot = Self::new();

        for entry in vcs.list_heads().await? {
            let name = strip_prefix(&entry.name, HEADS_PREFIX);
            snapshot.heads.insert(name, entry.rev);
        }

        for entry in vcs.list_tags().await? {
            let object_type = vcs.object_type(&entry.rev).await?;
            if object_type != "tag" {
                debug!(tag = %entry.name, object_type = %object_type, "skipping lightweight tag");
                continue;
            }
            let name = strip_prefix(&entry.name, TAGS_PREFIX);
            snapshot.tags.insert(name, entry.rev);
        }

        let roots: Vec<String> = snapshot
            .heads
            .values()
            .chain(snapshot.tags.values())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        snapshot.revs = vcs
            .rev_list(&RevListQuery::reachable(roots))
            .await?
            .into_iter()
            .collect();

        info!(
            heads = snapshot.heads.len(),
            tags = snapshot.tags.len(),
            revs = snapshot.revs.len(),
            "captured current repository state"
        );
        Ok(snapshot)
    }

    /// Record `rev` as notified during this run. Returns `false` if it was
    /// already recorded.
    pub fn mark_reported(&mut self, rev: &str) -> bool {
        self.reported.insert(rev.to_string())
    }

    pub fn is_reported(&self, rev: &str) -> bool {
        self.reported.contains(rev)
    }

    /// Keep every revision and manual-diff id `previous` knew about, so
    /// commits that become unreachable are never reported again.
    pub fn carry_forward(&mut self, previous: &Snapshot) {
        self.revs.extend(previous.revs.iter().cloned());
        self.diffs = previous.diffs.clone();
    }
}

fn strip_prefix(name: &str, prefix: &str) -> String {
    name.strip_prefix(prefix).unwrap_or(name).to_string()
}
