//! Change detection between two snapshots.
//!
//! The [`ReconciliationEngine`] compares the previous run's [`Snapshot`] with
//! the freshly captured one, decides which notifications are due and hands
//! them to the [`NotificationDispatcher`] in a fixed order:
//!
//! 1. branches created, then branches deleted;
//! 2. tags created, then tags deleted;
//! 3. revisions new to the repository, oldest first;
//! 4. stable branches in name order, either every revision on the path
//!    (`allchanges` branches) or a single head-moved summary.
//!
//! A revision is notified at most once per run; the per-run `reported` set of
//! the current snapshot tracks what went out.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::NotifierConfig;
use crate::errors::{ConfigError, CoreError};
use crate::notify::{ChangeEvent, NotificationDispatcher, Transport};
use crate::snapshot::{RefKind, Snapshot};
use crate::vcs::{RevListQuery, Vcs};

/// Label used for manual diffs in subjects and pseudo-revision ids.
pub const MANUAL_DIFF_LABEL: &str = "<manual-diff>";

/// What changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// `(name, rev)` of each new branch.
    pub branches_created: Vec<(String, String)>,
    pub branches_deleted: Vec<String>,
    /// `(name, tag object)` of each new annotated tag.
    pub tags_created: Vec<(String, String)>,
    pub tags_deleted: Vec<String>,
    /// Branches present in both snapshots.
    pub stable_heads: Vec<String>,
    /// Revisions reachable now but not before.
    pub new_revs: BTreeSet<String>,
}

impl Delta {
    pub fn between(previous: &Snapshot, current: &Snapshot) -> Self {
        let mut delta = Self::default();

        for (name, rev) in &current.heads {
            if previous.heads.contains_key(name) {
                delta.stable_heads.push(name.clone());
            } else {
                delta.branches_created.push((name.clone(), rev.clone()));
            }
        }
        delta.branches_deleted = previous
            .heads
            .keys()
            .filter(|name| !current.heads.contains_key(*name))
            .cloned()
            .collect();

        delta.tags_created = current
            .tags
            .iter()
            .filter(|(name, _)| !previous.tags.contains_key(*name))
            .map(|(name, rev)| (name.clone(), rev.clone()))
            .collect();
        delta.tags_deleted = previous
            .tags
            .keys()
            .filter(|name| !current.tags.contains_key(*name))
            .cloned()
            .collect();

        delta.new_revs = current.revs.difference(&previous.revs).cloned().collect();
        delta
    }
}

/// A revision range given on the command line as `[old..]new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevRange {
    pub old: String,
    pub new: String,
}

impl RevRange {
    /// Range for a manual report: a single `rev` means `rev~1..rev`.
    pub fn for_report(spec: &str) -> Result<Self, ConfigError> {
        let (old, new) = split_range(spec, "manual")?;
        Ok(match old {
            Some(old) => Self { old, new },
            None => Self {
                old: format!("{}~1", new),
                new,
            },
        })
    }

    /// Range for a manual diff: a single `rev` means `rev~2..rev`, otherwise
    /// `old~1..new` so the first diff starts at `old` itself.
    pub fn for_diff(spec: &str) -> Result<Self, ConfigError> {
        let (old, new) = split_range(spec, "diff")?;
        Ok(match old {
            Some(old) => Self {
                old: format!("{}~1", old),
                new,
            },
            None => Self {
                old: format!("{}~2", new),
                new,
            },
        })
    }

    fn query(&self) -> RevListQuery {
        RevListQuery::path(self.new.clone(), self.old.clone())
    }
}

fn split_range(spec: &str, field: &str) -> Result<(Option<String>, String), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        field: field.to_string(),
        expected: "a revision range [old..]new".into(),
        value: spec.to_string(),
    };

    match spec.split_once("..") {
        Some((old, new)) => {
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                return Err(invalid());
            }
            Ok((Some(old.to_string()), new.to_string()))
        }
        None => {
            let rev = spec.trim();
            if rev.is_empty() {
                return Err(invalid());
            }
            Ok((None, rev.to_string()))
        }
    }
}

/// Decides which notifications are due and dispatches them in order.
pub struct ReconciliationEngine<'a> {
    config: &'a NotifierConfig,
    vcs: &'a dyn Vcs,
    dispatcher: NotificationDispatcher<'a>,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(config: &'a NotifierConfig, vcs: &'a dyn Vcs, transport: &'a dyn Transport) -> Self {
        Self {
            config,
            vcs,
            dispatcher: NotificationDispatcher::new(config, vcs, transport),
        }
    }

    /// Messages delivered so far.
    pub fn sent(&self) -> usize {
        self.dispatcher.sent()
    }

    /// Report everything that changed between `previous` and `current`.
    pub async fn run(&mut self, previous: &Snapshot, current: &mut Snapshot) -> Result<Delta, CoreError> {
        let delta = Delta::between(previous, current);
        debug!(
            branches_created = delta.branches_created.len(),
            branches_deleted = delta.branches_deleted.len(),
            tags_created = delta.tags_created.len(),
            tags_deleted = delta.tags_deleted.len(),
            new_revs = delta.new_revs.len(),
            "computed delta"
        );

        for (name, rev) in &delta.branches_created {
            self.ref_created(RefKind::Branch, name, rev).await?;
        }
        for name in &delta.branches_deleted {
            self.ref_deleted(RefKind::Branch, name).await?;
        }
        for (name, rev) in &delta.tags_created {
            self.ref_created(RefKind::Tag, name, rev).await?;
        }
        for name in &delta.tags_deleted {
            self.ref_deleted(RefKind::Tag, name).await?;
        }

        self.report_path(delta.new_revs.iter().cloned().collect(), false, None, current)
            .await?;

        for head in &delta.stable_heads {
            let (Some(old_rev), Some(new_rev)) = (previous.heads.get(head), current.heads.get(head)) else {
                continue;
            };
            if old_rev == new_rev {
                continue;
            }

            let path = self
                .vcs
                .rev_list(&RevListQuery::path(new_rev.clone(), old_rev.clone()))
                .await?;

            if self.config.allchanges.contains(head) {
                debug!(head = %head, revs = path.len(), "reporting every change on branch");
                self.report_path(path, false, Some(head.as_str()), current).await?;
            } else if path.iter().any(|rev| !delta.new_revs.contains(rev)) {
                self.dispatcher
                    .dispatch(&ChangeEvent::HeadMoved {
                        head: head.clone(),
                        path,
                    })
                    .await?;
            } else {
                debug!(head = %head, "head moved only by revisions already reported");
            }
        }

        Ok(delta)
    }

    /// Report every revision in `[old..]new` regardless of earlier reports.
    pub async fn manual_report(&mut self, spec: &str, current: &mut Snapshot) -> Result<usize, CoreError> {
        let range = RevRange::for_report(spec)?;
        info!("Manual report {}..{}", range.old, range.new);
        let revs = self.vcs.rev_list(&range.query()).await?;
        let count = revs.len();
        self.report_path(revs, true, None, current).await?;
        Ok(count)
    }

    /// Send pairwise diffs along `[old..]new`. Diffs whose pseudo-revision is
    /// already in `diffs` are skipped; sent ones are added.
    pub async fn manual_diff(&mut self, spec: &str, diffs: &mut BTreeSet<String>) -> Result<usize, CoreError> {
        let range = RevRange::for_diff(spec)?;
        let revs = self.vcs.rev_list(&range.query()).await?;

        let mut sent = 0;
        for pair in revs.windows(2) {
            let (first, last) = (&pair[0], &pair[1]);
            let pseudo = format!("{}-{}", MANUAL_DIFF_LABEL, last);
            if diffs.contains(&pseudo) {
                info!("Diff {} already sent, skipping", pseudo);
                continue;
            }
            info!("New diff revision {}", pseudo);

            self.dispatcher
                .dispatch(&ChangeEvent::ManualDiff {
                    label: MANUAL_DIFF_LABEL.to_string(),
                    first: first.clone(),
                    last: last.clone(),
                })
                .await?;
            diffs.insert(pseudo);
            sent += 1;
        }
        Ok(sent)
    }

    async fn ref_created(&mut self, kind: RefKind, name: &str, rev: &str) -> Result<(), CoreError> {
        self.dispatcher
            .dispatch(&ChangeEvent::RefCreated {
                kind,
                name: name.to_string(),
                rev: rev.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn ref_deleted(&mut self, kind: RefKind, name: &str) -> Result<(), CoreError> {
        self.dispatcher
            .dispatch(&ChangeEvent::RefDeleted {
                kind,
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Sort `revs` oldest first and report each one.
    async fn report_path(
        &mut self,
        revs: Vec<String>,
        force: bool,
        subject_head: Option<&str>,
        current: &mut Snapshot,
    ) -> Result<(), CoreError> {
        if revs.is_empty() {
            return Ok(());
        }
        let sorted = self.vcs.rev_list(&RevListQuery::sorted(revs)).await?;
        for rev in sorted {
            self.commit(&rev, force, subject_head, current).await?;
        }
        Ok(())
    }

    async fn commit(
        &mut self,
        rev: &str,
        force: bool,
        subject_head: Option<&str>,
        current: &mut Snapshot,
    ) -> Result<(), CoreError> {
        if current.is_reported(rev) && !force {
            info!(
                "Flagged revision {} for notification, but already reported this time",
                rev
            );
            return Ok(());
        }

        info!("New revision {}", rev);
        current.mark_reported(rev);

        self.dispatcher
            .dispatch(&ChangeEvent::Commit {
                rev: rev.to_string(),
                subject_head: subject_head.map(str::to_string),
            })
            .await?;
        Ok(())
    }
}
