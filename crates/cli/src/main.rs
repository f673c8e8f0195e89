//! git-notifier command-line entry point.
//!
//! Run from a repository (typically a `post-receive` hook or a cron job) to
//! mail a notification for every change since the previous run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use gitnotifier_core::config::{ConfigLayer, Environment, NotifierConfig};
use gitnotifier_core::notify::build_transport;
use gitnotifier_core::runner::NotifierRun;
use gitnotifier_core::vcs::GitCli;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Mail notifications for changes to a git repository.
///
/// Every option can also be set as `git config hooks.<option>` in the
/// repository or in a TOML file given with `--config`. Command-line flags
/// take precedence over the file, which takes precedence over git config.
#[derive(Parser, Debug)]
#[command(name = "git-notifier", version)]
struct Cli {
    /// TOML file with notifier settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Repository to watch.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Branches for which all changes are reported individually (comma list).
    #[arg(long)]
    allchanges: Option<String>,

    /// Print messages to stdout instead of sending them; log to stderr.
    #[arg(long)]
    debug: bool,

    /// Send pairwise diffs for the range [old..]new.
    #[arg(long, value_name = "RANGE", conflicts_with = "manual")]
    diff: Option<String>,

    /// Prefix for mail subjects.
    #[arg(long)]
    emailprefix: Option<String>,

    /// Host name used to qualify local addresses.
    #[arg(long)]
    hostname: Option<String>,

    /// Log file.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Recipients, separated by commas, pipes or whitespace.
    #[arg(long)]
    mailinglist: Option<String>,

    /// Report every revision in the range [old..]new.
    #[arg(long, value_name = "RANGE")]
    manual: Option<String>,

    /// Largest diff included in a mail, in KB.
    #[arg(long, value_name = "KB")]
    maxdiffsize: Option<u64>,

    /// Do not record the current state.
    #[arg(long)]
    noupdate: bool,

    /// Repository URI sent in the X-Git-Repository header.
    #[arg(long)]
    repouri: Option<String>,

    /// Sender address.
    #[arg(long)]
    sender: Option<String>,

    /// Link template for each revision; %s is replaced by the revision.
    #[arg(long)]
    link: Option<String>,

    /// Record the current state without sending anything.
    #[arg(long)]
    updateonly: bool,

    /// File mapping logins to sender addresses.
    #[arg(long)]
    users: Option<PathBuf>,

    /// Reply-To address.
    #[arg(long)]
    replyto: Option<String>,

    /// File recording the repository state between runs.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// SMTP relay host.
    #[arg(long)]
    smtp_host: Option<String>,

    #[arg(long)]
    smtp_port: Option<u16>,

    /// SMTP login; defaults to the sender address.
    #[arg(long)]
    smtp_sender: Option<String>,

    /// Environment variable holding the SMTP password.
    #[arg(long, value_name = "VAR")]
    smtp_password_env: Option<String>,

    #[arg(long)]
    smtp_starttls: bool,

    /// Deliver through the local `sendmail -t`.
    #[arg(long)]
    sendmail: bool,
}

impl Cli {
    /// Flags as the highest-precedence configuration layer. Switches that
    /// are not given stay unset so lower layers can still enable them.
    fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            allchanges: self.allchanges.as_deref().map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            debug: flag(self.debug),
            diff: self.diff.clone(),
            emailprefix: self.emailprefix.clone(),
            hostname: self.hostname.clone(),
            log: self.log.clone(),
            mailinglist: self.mailinglist.clone(),
            manual: self.manual.clone(),
            maxdiffsize: self.maxdiffsize,
            noupdate: flag(self.noupdate),
            repouri: self.repouri.clone(),
            sender: self.sender.clone(),
            link: self.link.clone(),
            updateonly: flag(self.updateonly),
            users: self.users.clone(),
            replyto: self.replyto.clone(),
            state_file: self.state_file.clone(),
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            smtp_sender: self.smtp_sender.clone(),
            smtp_password_env: self.smtp_password_env.clone(),
            smtp_starttls: flag(self.smtp_starttls),
            sendmail: flag(self.sendmail),
        }
    }
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let repo_dir = cli
        .repo
        .canonicalize()
        .with_context(|| format!("repository not found: {}", cli.repo.display()))?;
    let vcs = GitCli::new(&repo_dir);

    let config = load_config(&cli, &vcs, &repo_dir).await?;
    let _guard = init_logging(&config, &repo_dir)?;

    info!(
        repo = %repo_dir.display(),
        recipients = config.mailinglist.len(),
        "starting git-notifier"
    );

    let transport = build_transport(&config);
    let report = NotifierRun::new(&config, &vcs, transport.as_ref())
        .execute()
        .await
        .context("notifier run failed")?;

    info!(outcome = ?report.outcome, sent = report.sent, saved = report.saved, "done");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

async fn load_config(cli: &Cli, vcs: &GitCli, repo_dir: &Path) -> Result<NotifierConfig> {
    let mut layer = cli.to_layer();

    if let Some(ref path) = cli.config {
        let file = ConfigLayer::load_from_file(path).context("failed to load configuration file")?;
        layer = layer.or(file);
    }

    let git = ConfigLayer::load_from_git(vcs)
        .await
        .context("failed to read hooks.* git configuration")?;
    layer = layer.or(git);

    let mut env = Environment::from_process();
    env.repo_dir = repo_dir.to_path_buf();

    let mut config = NotifierConfig::resolve(layer, &env).context("invalid configuration")?;

    // Relative state files live in the repository, whatever the caller's cwd.
    if config.state_file.is_relative() {
        config.state_file = repo_dir.join(&config.state_file);
    }
    Ok(config)
}

/// Log to stderr in debug mode, otherwise append to the configured log file.
fn init_logging(config: &NotifierConfig, repo_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.debug {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let log_file = if config.log_file.is_relative() {
        repo_dir.join(&config.log_file)
    } else {
        config.log_file.clone()
    };
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(repo_dir);
    let name = log_file
        .file_name()
        .with_context(|| format!("invalid log file: {}", log_file.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}
