//! Error types for the git-notifier core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

// ---------------------------------------------------------------------------
// VCS errors
// ---------------------------------------------------------------------------

/// Errors from `git` subprocess invocations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status and wrote to stderr.
    #[error("git child failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// A command succeeded but its output was not in the expected shape.
    #[error("unexpected output from 'git {command}': {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Persisted state errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing the snapshot record file.
#[derive(Debug, Error)]
pub enum StateError {
    /// A line starts with a record type we do not know.
    #[error("unknown type {0} in cache file")]
    UnknownRecordType(String),

    /// A known record type is missing one of its fields.
    #[error("malformed '{kind}' record at line {line}: {content}")]
    MalformedRecord {
        kind: String,
        line: usize,
        content: String,
    },

    /// Generic I/O error.
    #[error("state file I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A setting the selected delivery mode depends on is not set.
    #[error("this script requires the setting <{0}> to be set in order to work")]
    MissingRequired(String),

    /// A config value is present but has the wrong type or shape.
    #[error("the configured value <{field}> must be of type {expected}: got '{value}'")]
    InvalidValue {
        field: String,
        expected: String,
        value: String,
    },

    /// Reading `git config` failed.
    #[error("failed to read git configuration: {0}")]
    Vcs(#[from] VcsError),

    /// Generic I/O error reading the config or users file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from composing or delivering a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// An address (sender, reply-to, recipient) could not be parsed.
    #[error("invalid address '{address}': {detail}")]
    InvalidAddress { address: String, detail: String },

    /// Email construction or SMTP delivery failed.
    #[error("email notification failed: {0}")]
    EmailError(String),

    /// The VCS could not supply the text for the message.
    #[error("notification VCS error: {0}")]
    Vcs(#[from] VcsError),

    /// Temporary diff buffer or stdout write failed.
    #[error("notification I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
