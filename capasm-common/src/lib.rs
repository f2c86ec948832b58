//! Capability Offline Assembler - Common Types and Utilities
//!
//! This crate contains the types shared across all components of the
//! offline assembler backend: source locations for diagnostics, the fatal
//! backend error taxonomy, and the recognized configuration options.

pub mod error;
pub mod options;
pub mod source_loc;

pub use error::BackendError;
pub use options::Options;
pub use source_loc::SourceLocation;
