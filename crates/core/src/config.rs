//! Layered configuration for git-notifier.
//!
//! Settings come from, highest precedence first:
//!
//! 1. command-line flags,
//! 2. an optional TOML file,
//! 3. `git config hooks.<name>` in the repository,
//! 4. built-in defaults.
//!
//! Each of the first three is a [`ConfigLayer`] with every field optional.
//! Layers are merged and then resolved into a [`NotifierConfig`] with plain
//! values, which is passed explicitly to the store, the reconciliation engine
//! and the dispatcher.
//!
//! Secrets are never stored in the file: `smtp_password_env` names the
//! environment variable that holds the SMTP password.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::users::SenderMap;
use crate::vcs::Vcs;

pub const DEFAULT_STATE_FILE: &str = ".git-notifier.dat";
pub const DEFAULT_LOG_FILE: &str = "git-notifier.log";
pub const DEFAULT_EMAIL_PREFIX: &str = "[git]";
pub const DEFAULT_MAX_DIFF_SIZE_KB: u64 = 50;
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Pause after each delivered message so mail clients see strictly
/// increasing timestamps.
pub const MAIL_PACING: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// One source of settings. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigLayer {
    /// Branches for which every change is reported individually.
    pub allchanges: Option<Vec<String>>,
    pub debug: Option<bool>,
    /// Manual diff range `[old..]new`.
    pub diff: Option<String>,
    pub emailprefix: Option<String>,
    pub hostname: Option<String>,
    pub log: Option<PathBuf>,
    /// Recipients, separated by commas, pipes or whitespace.
    pub mailinglist: Option<String>,
    /// Manual report range `[old..]new`.
    pub manual: Option<String>,
    /// Largest diff embedded in a mail, in KB.
    pub maxdiffsize: Option<u64>,
    pub noupdate: Option<bool>,
    pub repouri: Option<String>,
    pub sender: Option<String>,
    /// Link template, `%s` is replaced by the revision.
    pub link: Option<String>,
    pub updateonly: Option<bool>,
    /// Login-to-sender mapping file.
    pub users: Option<PathBuf>,
    pub replyto: Option<String>,
    pub state_file: Option<PathBuf>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_sender: Option<String>,
    pub smtp_password_env: Option<String>,
    pub smtp_starttls: Option<bool>,
    /// Deliver through the local `sendmail -t` instead of SMTP.
    pub sendmail: Option<bool>,
}

macro_rules! merge_fields {
    ($high:expr, $low:expr, $($field:ident),+ $(,)?) => {
        ConfigLayer { $($field: $high.$field.or($low.$field)),+ }
    };
}

impl ConfigLayer {
    /// Load a layer from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let layer: ConfigLayer =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(layer)
    }

    /// Read every `hooks.<name>` key from the repository's git config.
    pub async fn load_from_git(vcs: &dyn Vcs) -> Result<Self, ConfigError> {
        let mut raw = Vec::new();
        for key in GIT_KEYS {
            if let Some(value) = vcs.config_get(&format!("hooks.{}", key)).await? {
                raw.push((*key, value));
            }
        }
        debug!(count = raw.len(), "read hooks.* git configuration");
        Self::from_pairs(raw.iter().map(|(k, v)| (*k, v.as_str())))
    }

    /// Build a layer from `(name, value)` string pairs, e.g. git config.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigError> {
        let mut layer = Self::default();
        for (key, value) in pairs {
            let field = format!("hooks.{}", key);
            match key {
                "allchanges" => layer.allchanges = Some(split_list(value)),
                "debug" => layer.debug = Some(parse_bool(&field, value)?),
                "diff" => layer.diff = Some(value.to_string()),
                "emailprefix" => layer.emailprefix = Some(value.to_string()),
                "hostname" => layer.hostname = Some(value.to_string()),
                "log" => layer.log = Some(PathBuf::from(value)),
                "mailinglist" => layer.mailinglist = Some(value.to_string()),
                "manual" => layer.manual = Some(value.to_string()),
                "maxdiffsize" => layer.maxdiffsize = Some(parse_int(&field, value)?),
                "noupdate" => layer.noupdate = Some(parse_bool(&field, value)?),
                "repouri" => layer.repouri = Some(value.to_string()),
                "sender" => layer.sender = Some(value.to_string()),
                "link" => layer.link = Some(value.to_string()),
                "updateonly" => layer.updateonly = Some(parse_bool(&field, value)?),
                "users" => layer.users = Some(PathBuf::from(value)),
                "replyto" => layer.replyto = Some(value.to_string()),
                "state-file" => layer.state_file = Some(PathBuf::from(value)),
                "smtp-host" => layer.smtp_host = Some(value.to_string()),
                "smtp-port" => layer.smtp_port = Some(parse_int(&field, value)?),
                "smtp-sender" => layer.smtp_sender = Some(value.to_string()),
                "smtp-password-env" => layer.smtp_password_env = Some(value.to_string()),
                "smtp-starttls" => layer.smtp_starttls = Some(parse_bool(&field, value)?),
                "sendmail" => layer.sendmail = Some(parse_bool(&field, value)?),
                other => warn!(key = other, "ignoring unknown hooks.* setting"),
            }
        }
        Ok(layer)
    }

    /// Fill every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        merge_fields!(
            self,
            lower,
            allchanges,
            debug,
            diff,
            emailprefix,
            hostname,
            log,
            mailinglist,
            manual,
            maxdiffsize,
            noupdate,
            repouri,
            sender,
            link,
            updateonly,
            users,
            replyto,
            state_file,
            smtp_host,
            smtp_port,
            smtp_sender,
            smtp_password_env,
            smtp_starttls,
            sendmail,
        )
    }
}

const GIT_KEYS: &[&str] = &[
    "allchanges",
    "debug",
    "diff",
    "emailprefix",
    "hostname",
    "log",
    "mailinglist",
    "manual",
    "maxdiffsize",
    "noupdate",
    "repouri",
    "sender",
    "link",
    "updateonly",
    "users",
    "replyto",
    "state-file",
    "smtp-host",
    "smtp-port",
    "smtp-sender",
    "smtp-password-env",
    "smtp-starttls",
    "sendmail",
];

// ---------------------------------------------------------------------------
// Process environment
// ---------------------------------------------------------------------------

/// The parts of the process environment the defaults depend on.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// `$LOGNAME`.
    pub logname: String,
    /// `$GL_USER`, set when running under gitolite.
    pub gl_user: Option<String>,
    /// `$GL_ADMINDIR`, set when running under gitolite.
    pub gl_admindir: Option<PathBuf>,
    pub hostname: String,
    /// Directory the notifier runs in, normally the repository.
    pub repo_dir: PathBuf,
}

impl Environment {
    pub fn from_process() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            logname: std::env::var("LOGNAME").unwrap_or_default(),
            gl_user: std::env::var("GL_USER").ok().filter(|v| !v.is_empty()),
            gl_admindir: std::env::var_os("GL_ADMINDIR").map(PathBuf::from),
            hostname,
            repo_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn is_gitolite(&self) -> bool {
        self.gl_user.is_some()
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// How composed messages leave the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Print messages to stdout; nothing is sent.
    Debug,
    /// Pipe to the local `sendmail -t`.
    Sendmail,
    Smtp(SmtpSettings),
}

/// SMTP connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    /// Login name; defaults to the sender address.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("starttls", &self.starttls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub allchanges: BTreeSet<String>,
    pub debug: bool,
    pub manual_diff: Option<String>,
    pub manual_report: Option<String>,
    pub emailprefix: String,
    pub log_file: PathBuf,
    pub mailinglist: Vec<String>,
    pub max_diff_size_kb: u64,
    pub noupdate: bool,
    pub updateonly: bool,
    /// Repository URI shown in the `X-Git-Repository` header.
    pub repouri: String,
    pub sender: String,
    pub replyto: Option<String>,
    pub link: Option<String>,
    pub state_file: PathBuf,
    pub delivery: Delivery,
}

impl NotifierConfig {
    /// Apply defaults to a merged layer and validate the result.
    pub fn resolve(layer: ConfigLayer, env: &Environment) -> Result<Self, ConfigError> {
        let debug = layer.debug.unwrap_or(false);
        let whoami = env.logname.clone();

        let mut sender = layer
            .sender
            .or_else(|| env.gl_user.clone())
            .unwrap_or_else(|| whoami.clone());

        let users = layer.users.or_else(|| {
            env.gl_admindir
                .as_ref()
                .map(|dir| dir.join("conf/sender.cfg"))
                .filter(|p| p.exists())
        });
        if let Some(path) = users.filter(|p| p.exists()) {
            if let Some(mapped) = SenderMap::load(&path)?.lookup(&sender) {
                debug!(login = %sender, sender = mapped, "mapped sender from users file");
                sender = mapped.to_string();
            }
        }

        let hostname = layer.hostname.unwrap_or_else(|| env.hostname.clone());
        let repouri = layer
            .repouri
            .unwrap_or_else(|| default_repo_uri(env, &whoami, &hostname));

        let sender = qualify_address(&sender, &hostname);
        let mailinglist = parse_emails(&layer.mailinglist.unwrap_or(whoami))
            .iter()
            .map(|addr| qualify_address(addr, &hostname))
            .collect();

        let delivery = if debug {
            Delivery::Debug
        } else if layer.sendmail.unwrap_or(false) {
            Delivery::Sendmail
        } else {
            let host = layer
                .smtp_host
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ConfigError::MissingRequired("hooks.smtp-host".into()))?;
            let password = layer
                .smtp_password_env
                .as_deref()
                .and_then(|name| resolve_optional_env(name, "smtp-password-env"));
            Delivery::Smtp(SmtpSettings {
                host,
                port: layer.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
                starttls: layer.smtp_starttls.unwrap_or(false),
                username: layer.smtp_sender,
                password,
            })
        };

        let config = Self {
            allchanges: layer.allchanges.unwrap_or_default().into_iter().collect(),
            debug,
            manual_diff: layer.diff.filter(|d| !d.is_empty()),
            manual_report: layer.manual.filter(|m| !m.is_empty()),
            emailprefix: layer
                .emailprefix
                .unwrap_or_else(|| DEFAULT_EMAIL_PREFIX.to_string()),
            log_file: layer.log.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            mailinglist,
            max_diff_size_kb: layer.maxdiffsize.unwrap_or(DEFAULT_MAX_DIFF_SIZE_KB),
            noupdate: layer.noupdate.unwrap_or(false),
            updateonly: layer.updateonly.unwrap_or(false),
            repouri,
            sender,
            replyto: layer.replyto.filter(|r| !r.is_empty()),
            link: layer.link.filter(|l| !l.is_empty()),
            state_file: layer
                .state_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            delivery,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manual_diff.is_some() && self.manual_report.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "diff".into(),
                expected: "a range used without --manual".into(),
                value: self.manual_diff.clone().unwrap_or_default(),
            });
        }
        if self.sender.is_empty() {
            return Err(ConfigError::MissingRequired("hooks.sender".into()));
        }
        Ok(())
    }

    /// Largest diff embedded in a mail, in bytes.
    pub fn max_diff_bytes(&self) -> u64 {
        self.max_diff_size_kb.saturating_mul(1024)
    }

    /// Pause between delivered messages; zero in debug mode.
    pub fn pacing(&self) -> Duration {
        if self.debug {
            Duration::ZERO
        } else {
            MAIL_PACING
        }
    }
}

/// `ssh://[user@]host/<dir>` with a trailing `.git` removed.
fn default_repo_uri(env: &Environment, whoami: &str, hostname: &str) -> String {
    let dir = env
        .repo_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let repo = if env.is_gitolite() {
        format!("ssh://{}@{}/{}", whoami, hostname, dir)
    } else {
        format!("ssh://{}/{}", hostname, dir)
    };
    repo.strip_suffix(".git").map(str::to_string).unwrap_or(repo)
}

/// Local logins become `login@hostname`, the way a local MTA would deliver.
fn qualify_address(addr: &str, hostname: &str) -> String {
    if addr.is_empty() || addr.contains('@') {
        addr.to_string()
    } else {
        format!("{}@{}", addr, hostname)
    }
}

/// Split a recipient list on commas, pipes and whitespace.
pub fn parse_emails(emails: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[,|\s]+").expect("valid separator regex"));
    re.split(emails)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "boolean".into(),
            value: value.to_string(),
        }),
    }
}

fn parse_int<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            expected: "integer".into(),
            value: value.to_string(),
        })
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
