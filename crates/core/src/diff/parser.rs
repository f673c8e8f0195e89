//! Unified diff hunk parser.

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, warn};

/// The marker git prints after a last line that lacks a trailing newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One `@@ -start,len +start,len @@` segment of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub start_src: Option<u64>,
    pub lines_src: Option<u64>,
    pub start_tgt: Option<u64>,
    pub lines_tgt: Option<u64>,
    /// Set when the `@@` header could not be parsed.
    pub invalid: bool,
    /// Raw lines, markers included, in input order.
    pub text: Vec<String>,
}

impl Hunk {
    /// Start a hunk from its `@@` header line.
    pub fn from_header(header: &str) -> Self {
        let mut hunk = Self::default();
        match header_regex().captures(header) {
            Some(caps) => {
                let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
                hunk.start_src = num(1);
                hunk.lines_src = num(2).or(Some(1));
                hunk.start_tgt = num(3);
                hunk.lines_tgt = num(4).or(Some(1));
                hunk.invalid = hunk.start_src.is_none() || hunk.start_tgt.is_none();
            }
            None => hunk.invalid = true,
        }
        if hunk.invalid {
            warn!(header, "could not parse hunk header");
        }
        hunk
    }

    pub fn append(&mut self, line: &str) {
        self.text.push(line.to_string());
    }
}

impl std::fmt::Display for Hunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text.join("\n"))
    }
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    TopLevel,
    InHunk,
}

/// Splits diff text into hunks.
///
/// A hunk is closed only by the no-newline marker. A hunk still open at the
/// end of the input is dropped, and a second `@@` header inside an open hunk
/// is kept as an ordinary text line.
#[derive(Debug, Default)]
pub struct DiffParser;

impl DiffParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, diff_text: &str) -> Vec<Hunk> {
        let mut state = ParseState::TopLevel;
        let mut hunks = Vec::new();
        let mut current: Option<Hunk> = None;

        for line in diff_text.split('\n') {
            match state {
                ParseState::TopLevel => {
                    if line.starts_with("@@") {
                        current = Some(Hunk::from_header(line));
                        state = ParseState::InHunk;
                    }
                }
                ParseState::InHunk => {
                    if line == NO_NEWLINE_MARKER {
                        hunks.extend(current.take());
                        state = ParseState::TopLevel;
                    } else if let Some(hunk) = current.as_mut() {
                        hunk.append(line);
                    }
                }
            }
        }

        if let Some(open) = current {
            debug!(lines = open.text.len(), "dropping unterminated hunk at end of diff");
        }
        debug!(count = hunks.len(), "parsed diff hunks");
        hunks
    }
}
