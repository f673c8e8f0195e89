//! Shared fixtures: an in-memory repository and a transport that records
//! every message instead of sending it.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use gitnotifier_core::config::{ConfigLayer, Environment, NotifierConfig};
use gitnotifier_core::errors::{NotificationError, VcsError};
use gitnotifier_core::notify::{OutgoingMessage, Transport};
use gitnotifier_core::vcs::{DiffRequest, RefEntry, RevListQuery, RevOrder, ShowFormat, Vcs};

// ===========================================================================
// In-memory repository
// ===========================================================================

#[derive(Debug, Clone)]
pub struct FakeCommit {
    pub parents: Vec<String>,
    pub message: String,
    /// Commit timestamp, used for date ordering.
    pub time: u64,
    /// Raw `git diff-tree` output; not necessarily UTF-8.
    pub diff: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FakeRepo {
    pub commits: BTreeMap<String, FakeCommit>,
    /// Branch name -> commit.
    pub heads: BTreeMap<String, String>,
    /// Tag name -> tag object (annotated) or commit (lightweight).
    pub tags: BTreeMap<String, String>,
    /// Annotated tag object -> target commit.
    pub tag_objects: BTreeMap<String, String>,
    pub config: BTreeMap<String, String>,
    clock: u64,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit with a default one-hunk diff and return its id.
    pub fn commit(&mut self, id: &str, parents: &[&str], message: &str) -> String {
        let diff = sample_diff(message);
        self.commit_with_diff(id, parents, message, &diff)
    }

    pub fn commit_with_diff(&mut self, id: &str, parents: &[&str], message: &str, diff: &str) -> String {
        self.commit_with_raw_diff(id, parents, message, diff.as_bytes())
    }

    pub fn commit_with_raw_diff(&mut self, id: &str, parents: &[&str], message: &str, diff: &[u8]) -> String {
        self.clock += 10;
        self.commits.insert(
            id.to_string(),
            FakeCommit {
                parents: parents.iter().map(|p| p.to_string()).collect(),
                message: message.to_string(),
                time: self.clock,
                diff: diff.to_vec(),
            },
        );
        id.to_string()
    }

    pub fn set_head(&mut self, name: &str, rev: &str) {
        self.heads.insert(name.to_string(), rev.to_string());
    }

    pub fn delete_head(&mut self, name: &str) {
        self.heads.remove(name);
    }

    pub fn annotated_tag(&mut self, name: &str, object: &str, target: &str) {
        self.tags.insert(name.to_string(), object.to_string());
        self.tag_objects.insert(object.to_string(), target.to_string());
    }

    pub fn lightweight_tag(&mut self, name: &str, target: &str) {
        self.tags.insert(name.to_string(), target.to_string());
    }

    /// Resolve tag objects and `rev~N` suffixes to a commit id.
    fn resolve(&self, rev: &str) -> Result<String, VcsError> {
        let (base, steps) = match rev.split_once('~') {
            Some((base, n)) => (base, n.parse::<usize>().unwrap_or(1)),
            None => (rev, 0),
        };
        let mut id = self
            .tag_objects
            .get(base)
            .cloned()
            .unwrap_or_else(|| base.to_string());
        for _ in 0..steps {
            let commit = self.lookup(&id)?;
            id = commit.parents.first().cloned().ok_or_else(|| unknown(rev))?;
        }
        self.lookup(&id)?;
        Ok(id)
    }

    fn lookup(&self, id: &str) -> Result<&FakeCommit, VcsError> {
        self.commits.get(id).ok_or_else(|| unknown(id))
    }

    fn ancestry(&self, roots: &[String]) -> Result<BTreeSet<String>, VcsError> {
        let mut seen = BTreeSet::new();
        let mut stack = Vec::new();
        for root in roots {
            stack.push(self.resolve(root)?);
        }
        while let Some(id) = stack.pop() {
            if seen.insert(id.clone()) {
                stack.extend(self.lookup(&id)?.parents.iter().cloned());
            }
        }
        Ok(seen)
    }

    fn by_date(&self, revs: impl IntoIterator<Item = String>, order: RevOrder) -> Vec<String> {
        let mut revs: Vec<String> = revs.into_iter().collect();
        revs.sort_by_key(|r| self.commits.get(r).map(|c| c.time).unwrap_or(0));
        if order == RevOrder::Native {
            revs.reverse();
        }
        revs
    }

    fn subject(&self, rev: &str) -> Result<String, VcsError> {
        Ok(self
            .lookup(rev)?
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }
}

fn unknown(rev: &str) -> VcsError {
    VcsError::CommandFailed {
        exit_code: 128,
        stderr: format!("fatal: bad revision '{}'", rev),
    }
}

fn short(rev: &str) -> &str {
    &rev[..rev.len().min(7)]
}

/// A small diff with one hunk touching a single file.
pub fn sample_diff(message: &str) -> String {
    format!(
        " README | 2 +-\n 1 file changed, 1 insertion(+), 1 deletion(-)\n\n\
         diff --git a/README b/README\n\
         --- a/README\n\
         +++ b/README\n\
         @@ -1 +1 @@\n\
         -old line\n\
         +{}\n\
         \\ No newline at end of file\n",
        message.lines().next().unwrap_or_default()
    )
}

#[async_trait]
impl Vcs for FakeRepo {
    async fn list_heads(&self) -> Result<Vec<RefEntry>, VcsError> {
        Ok(self
            .heads
            .iter()
            .map(|(name, rev)| RefEntry::new(rev.clone(), format!("refs/heads/{}", name)))
            .collect())
    }

    async fn list_tags(&self) -> Result<Vec<RefEntry>, VcsError> {
        Ok(self
            .tags
            .iter()
            .map(|(name, rev)| RefEntry::new(rev.clone(), format!("refs/tags/{}", name)))
            .collect())
    }

    async fn object_type(&self, rev: &str) -> Result<String, VcsError> {
        if self.tag_objects.contains_key(rev) {
            Ok("tag".into())
        } else {
            self.lookup(rev)?;
            Ok("commit".into())
        }
    }

    async fn rev_list(&self, query: &RevListQuery) -> Result<Vec<String>, VcsError> {
        if query.no_walk {
            let revs = query
                .roots
                .iter()
                .map(|r| self.resolve(r))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(self.by_date(revs, query.order));
        }
        let included = self.ancestry(&query.roots)?;
        let excluded = self.ancestry(&query.excluding)?;
        Ok(self.by_date(included.difference(&excluded).cloned(), query.order))
    }

    async fn show(&self, rev: &str, format: ShowFormat) -> Result<String, VcsError> {
        let id = self.resolve(rev)?;
        let commit = self.lookup(&id)?;
        Ok(match format {
            ShowFormat::Summary => format!("{} ({})", self.subject(&id)?, short(&id)),
            ShowFormat::Oneline => format!("{} {}\n", short(&id), self.subject(&id)?),
            ShowFormat::Medium => {
                let mut out = format!(
                    "commit {}\nAuthor: Jane Dev <jane@example.com>\nDate:   Mon Jan 1 00:00:{:02} 2024 +0000\n\n",
                    id,
                    commit.time % 60
                );
                for line in commit.message.lines() {
                    out.push_str(&format!("    {}\n", line));
                }
                out
            }
        })
    }

    async fn branches_containing(&self, rev: &str) -> Result<Vec<String>, VcsError> {
        let id = self.resolve(rev)?;
        let mut heads = Vec::new();
        for (name, head) in &self.heads {
            if self.ancestry(std::slice::from_ref(head))?.contains(&id) {
                heads.push(name.clone());
            }
        }
        Ok(heads)
    }

    async fn write_diff(&self, request: &DiffRequest, out: &Path) -> Result<(), VcsError> {
        let rev = match request {
            DiffRequest::Commit(rev) => rev,
            DiffRequest::Range { last, .. } => last,
        };
        let diff = &self.lookup(&self.resolve(rev)?)?.diff;
        std::fs::write(out, diff)?;
        Ok(())
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>, VcsError> {
        Ok(self.config.get(key).cloned())
    }
}

// ===========================================================================
// Recording transport
// ===========================================================================

#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.subject).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ===========================================================================
// Configuration
// ===========================================================================

pub fn test_env() -> Environment {
    Environment {
        logname: "git".into(),
        gl_user: None,
        gl_admindir: None,
        hostname: "git.example.com".into(),
        repo_dir: PathBuf::from("/srv/git/project.git"),
    }
}

/// Layer with everything a run needs; tests override single fields.
pub fn base_layer(state_file: &Path) -> ConfigLayer {
    ConfigLayer {
        mailinglist: Some("dev@example.com".into()),
        sender: Some("Git <git@example.com>".into()),
        smtp_host: Some("localhost".into()),
        state_file: Some(state_file.to_path_buf()),
        ..Default::default()
    }
}

pub fn config_with(layer: ConfigLayer) -> NotifierConfig {
    NotifierConfig::resolve(layer, &test_env()).expect("test config resolves")
}

pub fn test_config(state_file: &Path) -> NotifierConfig {
    config_with(base_layer(state_file))
}
