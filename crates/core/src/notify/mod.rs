//! Notification composition and dispatch.
//!
//! The [`NotificationDispatcher`] turns each classified [`ChangeEvent`] into
//! an [`OutgoingMessage`] and hands it to a [`Transport`]. Commit events are
//! composed in two explicit phases: the `git show` output is classified first
//! (skip, metadata only, metadata and diff), and only then is a diff produced.

pub mod email;
pub mod transport;

use tracing::{debug, info};

use crate::config::{Delivery, NotifierConfig};
use crate::diff::{DiffDocument, DiffParser, Hunk};
use crate::errors::NotificationError;
use crate::snapshot::RefKind;
use crate::vcs::{output_lines, DiffRequest, ShowFormat, Vcs};

pub use email::{SendmailMailer, SmtpMailer};
pub use transport::{OutgoingMessage, StdoutTransport, Transport};

/// Commit message marker that suppresses the mail entirely.
pub const NO_MAIL: &str = "[nomail]";
/// Commit message marker that suppresses the diff but keeps the mail.
pub const NO_DIFF: &str = "[nodiff]";

const SEPARATOR: &str = ">---------------------------------------------------------------";

/// A single thing worth telling the mailing list about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    RefCreated {
        kind: RefKind,
        name: String,
        rev: String,
    },
    RefDeleted {
        kind: RefKind,
        name: String,
    },
    /// One revision. `subject_head` overrides the branch list in the subject.
    Commit {
        rev: String,
        subject_head: Option<String>,
    },
    /// Summary for a branch whose new revisions were not all reported
    /// individually.
    HeadMoved {
        head: String,
        path: Vec<String>,
    },
    /// Point-to-point diff requested by hand.
    ManualDiff {
        label: String,
        first: String,
        last: String,
    },
}

/// What `git show` says about how a revision may be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowClassification {
    Skip,
    MetadataOnly,
    MetadataAndDiff,
}

impl ShowClassification {
    /// The first marker found, scanning line by line, decides.
    pub fn classify(show_output: &str) -> Self {
        for line in show_output.lines() {
            if line.contains(NO_DIFF) {
                return Self::MetadataOnly;
            }
            if line.contains(NO_MAIL) {
                return Self::Skip;
            }
        }
        Self::MetadataAndDiff
    }
}

/// Result of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Suppressed by a `[nomail]` marker.
    Suppressed,
}

/// The diff section of a commit mail.
enum DiffBody {
    None,
    Hunks(Vec<Hunk>),
    TooLarge { command: String, size: u64 },
}

/// Composes messages for change events and delivers them, one at a time.
pub struct NotificationDispatcher<'a> {
    config: &'a NotifierConfig,
    vcs: &'a dyn Vcs,
    transport: &'a dyn Transport,
    sent: usize,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(config: &'a NotifierConfig, vcs: &'a dyn Vcs, transport: &'a dyn Transport) -> Self {
        Self {
            config,
            vcs,
            transport,
            sent: 0,
        }
    }

    /// Number of messages handed to the transport so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Compose and deliver the message for `event`, then pause before the
    /// next one unless in debug mode.
    pub async fn dispatch(&mut self, event: &ChangeEvent) -> Result<DispatchOutcome, NotificationError> {
        let Some(message) = self.compose(event).await? else {
            return Ok(DispatchOutcome::Suppressed);
        };

        self.transport.send(&message).await?;
        self.sent += 1;

        let pause = self.config.pacing();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(DispatchOutcome::Sent)
    }

    /// Build the message for `event`; `None` when the event is suppressed.
    pub async fn compose(&self, event: &ChangeEvent) -> Result<Option<OutgoingMessage>, NotificationError> {
        match event {
            ChangeEvent::RefCreated { kind, name, rev } => {
                info!("New {} {}", kind, name);
                let text = format!(
                    "{}\n{}\n",
                    mail_tag(&format!("New {}", kind), name),
                    mail_tag("Referencing", rev)
                );
                let subject = format!("{} '{}' created", kind, name);
                Ok(Some(self.simple_message(&subject, &text)))
            }
            ChangeEvent::RefDeleted { kind, name } => {
                info!("Deleted {} {}", kind, name);
                let text = format!("{}\n", mail_tag(&format!("Deleted {}", kind), name));
                let subject = format!("{} '{}' deleted", kind, name);
                Ok(Some(self.simple_message(&subject, &text)))
            }
            ChangeEvent::Commit { rev, subject_head } => {
                let heads = self.vcs.branches_containing(rev).await?;
                let subject_head = subject_head.clone().unwrap_or_else(|| heads.join(","));
                let summary = self.summary(rev).await?;
                let subject = format!("{}: {}", subject_head, summary);
                self.change_message(rev, &subject, &heads, DiffRequest::Commit(rev.clone()))
                    .await
            }
            ChangeEvent::ManualDiff { label, first, last } => {
                info!("Diffing {}..{}", first, last);
                let summary = self.summary(last).await?;
                let subject = format!("{} diff: {}", label, summary);
                let request = DiffRequest::Range {
                    first: first.clone(),
                    last: last.clone(),
                };
                self.change_message(last, &subject, std::slice::from_ref(label), request)
                    .await
            }
            ChangeEvent::HeadMoved { head, path } => {
                let Some(last) = path.last() else {
                    debug!(head = %head, "empty path, no head-moved summary");
                    return Ok(None);
                };
                info!("Head moved: {} -> {}", head, last);
                let summary = self.summary(last).await?;
                let mut text = format!("Branch '{}' now includes:\n\n", head);
                for rev in path {
                    let oneline = self.vcs.show(rev, ShowFormat::Oneline).await?;
                    let line = output_lines(&oneline).into_iter().next().unwrap_or_default();
                    text.push_str(&format!("     {}\n", line));
                }
                let subject = format!("{}'s head updated: {}", head, summary);
                Ok(Some(self.simple_message(&subject, &text)))
            }
        }
    }

    async fn summary(&self, rev: &str) -> Result<String, NotificationError> {
        let output = self.vcs.show(rev, ShowFormat::Summary).await?;
        Ok(output_lines(&output).into_iter().next().unwrap_or_default())
    }

    /// Commit or manual-diff mail: metadata from `git show`, then the diff.
    async fn change_message(
        &self,
        rev: &str,
        subject: &str,
        heads: &[String],
        request: DiffRequest,
    ) -> Result<Option<OutgoingMessage>, NotificationError> {
        let show = self.vcs.show(rev, ShowFormat::Medium).await?;

        let diff = match ShowClassification::classify(&show) {
            ShowClassification::Skip => {
                info!(rev, "commit carries {}, not sending", NO_MAIL);
                return Ok(None);
            }
            ShowClassification::MetadataOnly => {
                debug!(rev, "commit carries {}, omitting diff", NO_DIFF);
                DiffBody::None
            }
            ShowClassification::MetadataAndDiff => self.load_diff(&request).await?,
        };

        let mut document = DiffDocument::new(subject).with_preamble(self.metadata(rev, heads, &show));
        match diff {
            DiffBody::None => {}
            DiffBody::Hunks(hunks) => document = document.with_hunks(hunks),
            DiffBody::TooLarge { command, size } => {
                debug!(rev, size, limit = self.config.max_diff_bytes(), "diff suppressed because of size");
                document = document.with_footer_note(format!(
                    "Diff suppressed because of size. To see it, use:\n\n    git {}",
                    command
                ));
            }
        }

        Ok(Some(self.message(subject, document.render())))
    }

    /// Buffer the diff in a temporary file, then parse it if it is small
    /// enough. The file is removed when the guard drops.
    async fn load_diff(&self, request: &DiffRequest) -> Result<DiffBody, NotificationError> {
        let tmp = tempfile::Builder::new()
            .prefix("git-notifier-")
            .suffix(".tmp")
            .tempfile()?;
        self.vcs.write_diff(request, tmp.path()).await?;

        let size = tmp.as_file().metadata()?.len();
        if size > self.config.max_diff_bytes() {
            return Ok(DiffBody::TooLarge {
                command: request.command_line(),
                size,
            });
        }

        let raw = std::fs::read(tmp.path())?;
        let text = String::from_utf8_lossy(&raw);
        Ok(DiffBody::Hunks(DiffParser::new().parse(&text)))
    }

    fn metadata(&self, rev: &str, heads: &[String], show: &str) -> String {
        let label = if heads.len() > 1 { "On branches" } else { "On branch" };
        let mut text = format!("{}\n", mail_tag(label, &heads.join(",")));
        if let Some(ref link) = self.config.link {
            text.push_str(&format!("{}\n", mail_tag("Link", &link.replace("%s", rev))));
        }
        text.push('\n');
        text.push_str(SEPARATOR);
        text.push('\n');
        for line in show.lines() {
            if line == "---" {
                text.push_str(SEPARATOR);
            } else {
                text.push_str(line);
            }
            text.push('\n');
        }
        text
    }

    fn simple_message(&self, subject: &str, text: &str) -> OutgoingMessage {
        let body = DiffDocument::new(subject).with_preamble(text).render();
        self.message(subject, body)
    }

    fn message(&self, subject: &str, html_body: String) -> OutgoingMessage {
        let subject = if self.config.emailprefix.is_empty() {
            subject.to_string()
        } else {
            format!("{} {}", self.config.emailprefix, subject)
        };
        OutgoingMessage {
            subject,
            from: self.config.sender.clone(),
            reply_to: self.config.replyto.clone(),
            recipients: self.config.mailinglist.clone(),
            html_body,
            repository: self.config.repouri.clone(),
        }
    }
}

/// Build the transport selected by the configuration.
pub fn build_transport(config: &NotifierConfig) -> Box<dyn Transport> {
    match config.delivery {
        Delivery::Debug => Box::new(StdoutTransport::new()),
        Delivery::Sendmail => Box::new(SendmailMailer::new()),
        Delivery::Smtp(ref smtp) => Box::new(SmtpMailer::new(smtp.clone(), &config.sender)),
    }
}

/// `Key        : value` line used in notification bodies.
pub fn mail_tag(key: &str, value: &str) -> String {
    format!("{:<11}: {}", key, value)
}

/// Minimal HTML escaping for user-provided strings.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
