//! Backend configuration
//!
//! The backend recognizes a single option: whether heap references are
//! stored as 64-bit offsets from a heap base capability or as full 128-bit
//! capabilities. It changes the width class used to emit `loadv`, `loadvmc`
//! and `storev`, and the access-size classification those opcodes get in
//! the address-legality passes.

/// Resolved configuration for one translation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Heap references are 64-bit offsets rather than full capabilities.
    pub heap_offset_refs: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }
}
