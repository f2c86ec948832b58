//! Source location tracking for error reporting
//!
//! Every pseudo-instruction carries the file and line of the assembly
//! source it was built from, so that a legalization or selection failure
//! can point back at the offending input line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in an assembly source file (line is 1-based)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub line: u32,
}

impl SourceLocation {
    /// Create a location with filename
    pub fn new(filename: &str, line: u32) -> Self {
        Self {
            filename: filename.to_string(),
            line,
        }
    }

    /// Create a dummy location for testing
    pub fn dummy() -> Self {
        Self::new("<unknown>", 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation::new("LowLevelInterpreter.asm", 42);
        assert_eq!(format!("{}", loc), "LowLevelInterpreter.asm:42");
    }

    #[test]
    fn test_dummy_location() {
        let loc = SourceLocation::dummy();
        assert_eq!(loc.filename, "<unknown>");
        assert_eq!(loc.line, 0);
    }
}
