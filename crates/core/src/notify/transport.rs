//! Delivery seam between composed messages and the outside world.

use std::io::Write;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::NotificationError;

/// A fully composed notification, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub recipients: Vec<String>,
    pub html_body: String,
    /// Value of the `X-Git-Repository` header.
    pub repository: String,
}

/// Something that can deliver an [`OutgoingMessage`].
///
/// Implementations treat an empty recipient list as a no-op and handle any
/// session or authentication details themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError>;
}

/// Debug-mode transport: writes each message to stdout instead of sending it.
#[derive(Debug, Default)]
pub struct StdoutTransport;

impl StdoutTransport {
    pub fn new() -> Self {
        Self
    }

    fn format(message: &OutgoingMessage) -> String {
        let mut out = format!(
            "From: {}\nTo: {}\nSubject: {}\n",
            message.from,
            message.recipients.join(", "),
            message.subject
        );
        if let Some(ref reply_to) = message.reply_to {
            out.push_str(&format!("Reply-To: {}\n", reply_to));
        }
        out.push_str(&format!("X-Git-Repository: {}\n\n", message.repository));
        out.push_str(&message.html_body);
        out
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError> {
        debug!(subject = %message.subject, "printing message (debug mode)");
        print_message(&Self::format(message))?;
        Ok(())
    }
}

fn print_message(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    stdout.flush()
}
