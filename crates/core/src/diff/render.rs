//! Self-contained HTML rendering of parsed hunks.

use super::parser::Hunk;
use crate::notify::html_escape;

const STYLESHEET: &str = "\
td.linenos { background-color: #f0f0f0; padding-right: 10px; }
span.lineno { background-color: #f0f0f0; padding: 0 5px 0 5px; }
pre { line-height: 125%; }
body .gd { color: #000000; background-color: #ffdddd }
body .ge { font-style: italic }
body .gr { color: #aa0000 }
body .gh { color: #999999 }
body .gi { color: #000000; background-color: #ddffdd }
";

const DOC_FOOTER: &str = "</body>\n</html>\n";

/// Style class applied to a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Deletion,
    Addition,
    Context,
}

impl LineStyle {
    pub fn of(line: &str) -> Self {
        if line.starts_with('-') {
            Self::Deletion
        } else if line.starts_with('+') {
            Self::Addition
        } else {
            Self::Context
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Deletion => "gd",
            Self::Addition => "gi",
            Self::Context => "gh",
        }
    }
}

/// An HTML page: optional metadata preamble, the hunks, and an optional
/// footer note.
#[derive(Debug, Clone, Default)]
pub struct DiffDocument {
    pub title: String,
    pub preamble: Option<String>,
    pub hunks: Vec<Hunk>,
    pub footer_note: Option<String>,
}

impl DiffDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_hunks(mut self, hunks: Vec<Hunk>) -> Self {
        self.hunks = hunks;
        self
    }

    pub fn with_footer_note(mut self, note: impl Into<String>) -> Self {
        self.footer_note = Some(note.into());
        self
    }

    pub fn render(&self) -> String {
        let title = html_escape(&self.title);
        let mut html = format!(
            "<!DOCTYPE html PUBLIC \"-//W3C//DTD HTML 4.01//EN\"\n   \
             \"http://www.w3.org/TR/html4/strict.dtd\">\n\n\
             <html>\n<head>\n  <title>{title}</title>\n  \
             <meta http-equiv=\"content-type\" content=\"text/html; charset=utf-8\">\n  \
             <style type=\"text/css\">\n{STYLESHEET}\n  </style>\n</head>\n<body>\n\
             <h2>{title}</h2>\n\n"
        );

        if let Some(ref preamble) = self.preamble {
            html.push_str("<pre>");
            html.push_str(&html_escape(preamble));
            html.push_str("</pre>\n");
        }

        for hunk in &self.hunks {
            html.push_str(&render_hunk(hunk));
        }

        if let Some(ref note) = self.footer_note {
            html.push_str("<pre>");
            html.push_str(&html_escape(note));
            html.push_str("</pre>\n");
        }

        html.push_str(DOC_FOOTER);
        html
    }
}

fn render_hunk(hunk: &Hunk) -> String {
    let mut html = String::from("<pre><div>");
    for line in &hunk.text {
        html.push_str(&format!(
            "<span class=\"{}\">{}</span>\n",
            LineStyle::of(line).class(),
            html_escape(line)
        ));
    }
    html.push_str("</div></pre>");
    html
}
