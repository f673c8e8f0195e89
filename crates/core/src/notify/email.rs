//! Email delivery via SMTP or the local `sendmail`.
//!
//! Uses the `lettre` crate to build HTML messages and hand them to either an
//! SMTP relay or the local mail transfer agent.

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{
    AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info, warn};

use super::transport::{OutgoingMessage, Transport};
use crate::config::SmtpSettings;
use crate::errors::NotificationError;

const MAILER: &str = concat!("git-notifier ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
struct XGitRepository(String);

impl Header for XGitRepository {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Git-Repository")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct XMailer(String);

impl Header for XMailer {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailer")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotificationError::InvalidAddress {
            address: address.to_string(),
            detail: e.to_string(),
        })
}

/// Build the MIME message for `message`: one mail addressed to every
/// recipient.
pub fn build_message(message: &OutgoingMessage) -> Result<Message, NotificationError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&message.from)?)
        .subject(message.subject.clone());

    for recipient in &message.recipients {
        builder = builder.to(parse_mailbox(recipient)?);
    }
    if let Some(ref reply_to) = message.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to)?);
    }

    builder
        .header(ContentType::TEXT_HTML)
        .header(XGitRepository(message.repository.clone()))
        .header(XMailer(MAILER.to_string()))
        .body(message.html_body.clone())
        .map_err(|e| NotificationError::EmailError(format!("failed to build email: {}", e)))
}

/// SMTP relay transport.
pub struct SmtpMailer {
    settings: SmtpSettings,
    /// Login used when no explicit SMTP user is configured.
    default_login: String,
}

impl SmtpMailer {
    /// `sender` is the envelope sender; its bare address doubles as the SMTP
    /// login when the settings carry a password but no username.
    pub fn new(settings: SmtpSettings, sender: &str) -> Self {
        let default_login = sender
            .parse::<Mailbox>()
            .map(|mb| mb.email.to_string())
            .unwrap_or_else(|_| sender.to_string());
        info!(
            host = %settings.host,
            port = settings.port,
            starttls = settings.starttls,
            "initializing SMTP mailer"
        );
        Self {
            settings,
            default_login,
        }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let host = self.settings.host.as_str();
        let builder = if self.settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(|e| {
                NotificationError::EmailError(format!("SMTP connection error: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let mut builder = builder.port(self.settings.port);
        if let Some(ref password) = self.settings.password {
            let username = self
                .settings
                .username
                .clone()
                .unwrap_or_else(|| self.default_login.clone());
            builder = builder.credentials(Credentials::new(username, password.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError> {
        if message.recipients.is_empty() {
            debug!(subject = %message.subject, "no recipients, not sending");
            return Ok(());
        }
        debug!(subject = %message.subject, to = ?message.recipients, "sending email");

        let email = build_message(message)?;
        let transport = self.build_transport()?;

        match transport.send(email).await {
            Ok(_) => {
                info!(subject = %message.subject, "email sent successfully");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to send email");
                Err(NotificationError::EmailError(format!(
                    "SMTP send via '{}' failed: {}",
                    self.settings.host, e
                )))
            }
        }
    }
}

/// Local mail transfer agent transport (`sendmail -t`).
pub struct SendmailMailer {
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailMailer {
    pub fn new() -> Self {
        info!("initializing sendmail mailer");
        Self {
            transport: AsyncSendmailTransport::<Tokio1Executor>::new(),
        }
    }
}

impl Default for SendmailMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SendmailMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError> {
        if message.recipients.is_empty() {
            debug!(subject = %message.subject, "no recipients, not sending");
            return Ok(());
        }

        let email = build_message(message)?;
        self.transport.send(email).await.map_err(|e| {
            warn!(error = %e, "sendmail delivery failed");
            NotificationError::EmailError(format!("sendmail failed: {}", e))
        })?;
        info!(subject = %message.subject, "handed message to sendmail");
        Ok(())
    }
}
