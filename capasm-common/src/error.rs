//! Error handling for the offline assembler backend
//!
//! Every failure in the backend is fatal to the current translation unit:
//! correctness of the generated assembly is non-negotiable, so the backend
//! fails loudly instead of emitting a plausible-but-wrong instruction.
//! All variants carry the source location of the instruction that caused
//! them, and the opcode mnemonic where one is known.

use crate::source_loc::SourceLocation;
use thiserror::Error;

/// Fatal backend error. There is no recovery path; any of these aborts
/// the current translation unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("bad register name {name} at {location}")]
    BadRegisterName {
        name: String,
        location: SourceLocation,
    },

    #[error("invalid immediate {value} at {location}")]
    BadImmediate {
        value: i64,
        location: SourceLocation,
    },

    #[error("invalid offset {offset} for {opcode} at {location}")]
    UnencodableOffset {
        offset: i64,
        opcode: String,
        location: SourceLocation,
    },

    #[error("unsupported addressing mode for {opcode} at {location}")]
    UnsupportedAddressingMode {
        opcode: String,
        location: SourceLocation,
    },

    /// An `AbsoluteAddress`, unresolved label, or leftover temporary reached
    /// the selector. This is a pipeline-ordering bug, not a user error.
    #[error("unresolved operand ({detail}) at {location}")]
    UnresolvedOperand {
        detail: String,
        location: SourceLocation,
    },

    #[error("{opcode} is not implemented for this target, at {location}")]
    UnsupportedOpcodeForTarget {
        opcode: String,
        location: SourceLocation,
    },

    /// A scaled capability address computation would overwrite the base it
    /// needs to reconstruct the capability from.
    #[error("scaled capability lea requires a destination distinct from its base, at {location}")]
    AliasingLeaRequiresDistinctBase { location: SourceLocation },

    #[error("no scratch register left for temporary {tmp} at {location}")]
    OutOfScratchRegisters {
        tmp: u32,
        location: SourceLocation,
    },
}

impl BackendError {
    /// The source location the error originated from.
    pub fn location(&self) -> &SourceLocation {
        match self {
            BackendError::BadRegisterName { location, .. }
            | BackendError::BadImmediate { location, .. }
            | BackendError::UnencodableOffset { location, .. }
            | BackendError::UnsupportedAddressingMode { location, .. }
            | BackendError::UnresolvedOperand { location, .. }
            | BackendError::UnsupportedOpcodeForTarget { location, .. }
            | BackendError::AliasingLeaRequiresDistinctBase { location }
            | BackendError::OutOfScratchRegisters { location, .. } => location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_location() {
        let err = BackendError::BadImmediate {
            value: 5000,
            location: SourceLocation::new("test.asm", 7),
        };
        assert_eq!(format!("{}", err), "invalid immediate 5000 at test.asm:7");
        assert_eq!(err.location().line, 7);
    }

    #[test]
    fn test_unsupported_opcode_message() {
        let err = BackendError::UnsupportedOpcodeForTarget {
            opcode: "orp".to_string(),
            location: SourceLocation::dummy(),
        };
        assert!(format!("{}", err).contains("not implemented for this target"));
    }
}
