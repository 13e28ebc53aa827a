use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in the original Monicelli source.
///
/// Lines and columns are 1-based; `0` means the front end did not provide one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Name of the source unit (usually a file name)
    pub source: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(source: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            source: source.into(),
            line,
            column,
        }
    }

    /// A location for synthesized code or tests.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether the front end supplied a real position.
    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl Default for Location {
    fn default() -> Self {
        Self {
            source: "<unknown>".to_string(),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}
