//! Unified diff to HTML conversion.

pub mod parser;
pub mod render;

pub use parser::{DiffParser, Hunk, NO_NEWLINE_MARKER};
pub use render::{DiffDocument, LineStyle};
