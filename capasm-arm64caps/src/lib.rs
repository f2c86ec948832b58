//! Capability Offline Assembler - AArch64 capability backend
//!
//! Translates the architecture-neutral pseudo-instruction list into textual
//! assembly for a 64-bit capability-extended AArch64 target, where pointers
//! are 128-bit hardware capabilities held in `c` registers.
//!
//! The backend is split the way the pipeline flows:
//!
//! - [`registers`]: the width-class register model. One logical register
//!   role renders to a different physical name per width (`w`/`c`/`x`/`d`).
//! - [`operand`]: operand-to-text rendering plus the offset-range legality
//!   the renderer enforces as a terminal cross-check.
//! - [`passes`]: the backend-specific legalization passes and the full
//!   ordered pipeline ([`passes::legalize`]).
//! - [`emit`]: the per-opcode instruction selector and the emission
//!   context ([`emit::assemble`] runs legalize + select in one call).
//!
//! Everything is a pure function from an instruction list (plus options) to
//! either new IR or output text; failures abort the unit with a
//! [`capasm_common::BackendError`].

pub mod emit;
pub mod operand;
pub mod passes;
pub mod registers;

pub use emit::{assemble, emit_unit, EmissionContext};
pub use passes::legalize;
pub use registers::{WidthClass, EXTRA_FPRS, EXTRA_GPRS};
