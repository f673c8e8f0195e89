//! Asynchronous git CLI client.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{output_lines, DiffRequest, RefEntry, RevListQuery, ShowFormat, Vcs};
use crate::errors::VcsError;

/// Client for querying a local repository via the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    /// Create a client that runs every command inside `repo_dir`.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let client = Self {
            repo_dir: repo_dir.into(),
        };
        info!(dir = %client.repo_dir.display(), "created GitCli");
        client
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn run_git(&self, args: &[String]) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = %format!("git {}", args.join(" ")), "running git command");
        let output = cmd.output().await.map_err(map_spawn_error)?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        check_status(output.status, stderr)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_git_str(&self, args: &[&str]) -> Result<String, VcsError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run_git(&args).await
    }
}

#[async_trait]
impl Vcs for GitCli {
    #[instrument(skip(self))]
    async fn list_heads(&self) -> Result<Vec<RefEntry>, VcsError> {
        let output = self.run_git_str(&["show-ref", "--heads"]).await?;
        parse_show_ref(&output)
    }

    #[instrument(skip(self))]
    async fn list_tags(&self) -> Result<Vec<RefEntry>, VcsError> {
        let output = self.run_git_str(&["show-ref", "--tags"]).await?;
        parse_show_ref(&output)
    }

    #[instrument(skip(self))]
    async fn object_type(&self, rev: &str) -> Result<String, VcsError> {
        let output = self.run_git_str(&["cat-file", "-t", rev]).await?;
        output_lines(&output)
            .into_iter()
            .next()
            .ok_or_else(|| VcsError::UnexpectedOutput {
                command: format!("cat-file -t {}", rev),
                detail: "empty output".into(),
            })
    }

    #[instrument(skip(self, query), fields(roots = query.roots.len()))]
    async fn rev_list(&self, query: &RevListQuery) -> Result<Vec<String>, VcsError> {
        if query.roots.is_empty() {
            return Ok(Vec::new());
        }
        let output = self.run_git(&query.args()).await?;
        let revs = output_lines(&output);
        debug!(count = revs.len(), "listed revisions");
        Ok(revs)
    }

    #[instrument(skip(self))]
    async fn show(&self, rev: &str, format: ShowFormat) -> Result<String, VcsError> {
        let mut args = vec!["show", "-s"];
        args.extend_from_slice(format.args());
        args.push(rev);
        self.run_git_str(&args).await
    }

    #[instrument(skip(self))]
    async fn branches_containing(&self, rev: &str) -> Result<Vec<String>, VcsError> {
        let contains = format!("--contains={}", rev);
        let output = self.run_git_str(&["branch", &contains]).await?;
        Ok(output_lines(&output)
            .iter()
            .filter_map(|line| line.split_whitespace().last().map(str::to_string))
            .collect())
    }

    #[instrument(skip(self), fields(out = %out.display()))]
    async fn write_diff(&self, request: &DiffRequest, out: &Path) -> Result<(), VcsError> {
        let file = std::fs::File::create(out)?;
        let args = request.args();

        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_dir)
            .args(&args)
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped());

        debug!(cmd = %format!("git {}", args.join(" ")), "writing diff");
        let output = cmd.output().await.map_err(map_spawn_error)?;
        check_status(output.status, String::from_utf8_lossy(&output.stderr).to_string())
    }

    #[instrument(skip(self))]
    async fn config_get(&self, key: &str) -> Result<Option<String>, VcsError> {
        let output = self.run_git_str(&["config", "--get", key]).await?;
        Ok(output_lines(&output).into_iter().next())
    }
}

fn map_spawn_error(e: std::io::Error) -> VcsError {
    if e.kind() == std::io::ErrorKind::NotFound {
        VcsError::BinaryNotFound("git".into())
    } else {
        VcsError::IoError(e)
    }
}

/// A non-zero exit only counts as a failure when git said something on
/// stderr. `show-ref` on a repository without tags and `config --get` on an
/// unset key both exit 1 silently.
fn check_status(status: std::process::ExitStatus, stderr: String) -> Result<(), VcsError> {
    if status.success() {
        return Ok(());
    }
    let exit_code = status.code().unwrap_or(-1);
    if stderr.trim().is_empty() {
        debug!(exit_code, "git exited non-zero without error output");
        return Ok(());
    }
    warn!(exit_code, %stderr, "git command failed");
    Err(VcsError::CommandFailed { exit_code, stderr })
}

/// Parse `<rev> <refname>` lines from `git show-ref`.
fn parse_show_ref(output: &str) -> Result<Vec<RefEntry>, VcsError> {
    output_lines(output)
        .iter()
        .map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(rev), Some(name)) => Ok(RefEntry::new(rev, name)),
                _ => Err(VcsError::UnexpectedOutput {
                    command: "show-ref".into(),
                    detail: format!("cannot parse line '{}'", line),
                }),
            }
        })
        .collect()
}
