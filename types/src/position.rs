//! Document positions and ranges.
//!
//! Lines and characters are 0-indexed, matching the wire protocol. Display
//! output is 1-indexed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point of interest inside a document: the subject of one info query.
///
/// Compared structurally so that a repeated cursor report for the same spot
/// can be told apart from real movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    uri: String,
    line: u32,
    character: u32,
}

impl Position {
    #[must_use]
    pub fn new(uri: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            character,
        }
    }

    /// Document URI (e.g. `file:///work/Main.lean`).
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 0-indexed line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0-indexed UTF-16 column.
    #[must_use]
    pub fn character(&self) -> u32 {
        self.character
    }

    #[must_use]
    pub fn in_document(&self, uri: &str) -> bool {
        self.uri == uri
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.uri, self.line + 1, self.character + 1)
    }
}

/// Line/character pair as it appears inside wire ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineCol {
    pub line: u32,
    pub character: u32,
}

/// Half-open text range, serialized in LSP shape (`{start, end}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: LineCol,
    pub end: LineCol,
}

impl Range {
    #[must_use]
    pub fn new(start: LineCol, end: LineCol) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn starts_on_line(&self, line: u32) -> bool {
        self.start.line == line
    }
}
