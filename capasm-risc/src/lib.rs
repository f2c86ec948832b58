//! Capability Offline Assembler - Shared RISC Lowering Passes
//!
//! This crate is the architecture-independent pass library shared by the
//! RISC-shaped backends, plus the temporary-register allocator. Every pass
//! is a pure list-to-list function:
//!
//! - it never mutates the list it receives,
//! - it is idempotent on its own output (re-running a pass on already-legal
//!   IR is a no-op),
//! - any fresh temporaries come from the caller's [`capasm_ir::TmpFactory`],
//!   so ids stay unique across the whole pipeline.
//!
//! Backends decide the pass order; the order is load-bearing and each pass
//! documents what it assumes already ran.

pub mod passes;
pub mod regalloc;

pub use passes::{
    lower_hard_branch_ops64, lower_malformed_addresses, lower_malformed_immediates,
    lower_misplaced_addresses, lower_misplaced_immediates, lower_not, lower_shift_ops,
    lower_simple_branch_ops, lower_test,
};
pub use regalloc::assign_registers_to_temporaries;
