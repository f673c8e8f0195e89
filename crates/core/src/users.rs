//! Login-to-sender mapping file.
//!
//! ```text
//! # login  sender
//! jdoe     John Doe <jdoe@example.com>
//! ```
//!
//! The first whitespace-separated token is the login, the rest of the line is
//! the sender address used in the `From` header.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::errors::ConfigError;

/// Parsed users file.
#[derive(Debug, Clone, Default)]
pub struct SenderMap {
    senders: HashMap<String, String>,
}

impl SenderMap {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading users file");
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut senders = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(login) = parts.next() else { continue };
            let sender = parts.collect::<Vec<_>>().join(" ");
            // First entry for a login wins.
            senders.entry(login.to_string()).or_insert(sender);
        }
        debug!(count = senders.len(), "parsed users file");
        Self { senders }
    }

    pub fn lookup(&self, login: &str) -> Option<&str> {
        self.senders.get(login).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
