//! Capability Offline Assembler - Pseudo-Instruction IR
//!
//! This crate defines the architecture-neutral IR shared by every backend
//! of the offline assembler:
//!
//! - The closed opcode vocabulary ([`Opcode`])
//! - Operand variants, register role vocabularies, and temporaries
//! - The immutable [`Instruction`] node threaded through the passes
//!
//! The IR is produced by an external builder; backends consume it as an
//! ordered list and rewrite it pass by pass, never mutating in place.

pub mod instruction;
pub mod opcode;
pub mod operand;

pub use instruction::Instruction;
pub use opcode::Opcode;
pub use operand::{
    Address, BaseIndex, FprRole, GprRole, Operand, ScratchReg, Tmp, TmpClass, TmpFactory,
};
