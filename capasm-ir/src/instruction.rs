//! The pseudo-instruction node
//!
//! Instructions are immutable once built: every legalization pass consumes
//! a list of them and produces a new list, so a failed pipeline can never
//! leave a half-rewritten unit behind.

use crate::opcode::Opcode;
use crate::operand::Operand;
use capasm_common::SourceLocation;
use std::fmt;

/// One pseudo-instruction, with the source location it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub origin: SourceLocation,
    pub annotation: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, origin: SourceLocation) -> Self {
        Self {
            opcode,
            operands,
            origin,
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: Option<String>) -> Self {
        self.annotation = annotation;
        self
    }

    /// A copy of this instruction with different operands, keeping the
    /// origin and annotation. The usual way passes rewrite a node.
    pub fn replacing_operands(&self, operands: Vec<Operand>) -> Self {
        Self {
            opcode: self.opcode,
            operands,
            origin: self.origin.clone(),
            annotation: self.annotation.clone(),
        }
    }

    /// This instruction under a different opcode.
    pub fn retagged(mut self, opcode: Opcode) -> Self {
        self.opcode = opcode;
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", operand)?;
            } else {
                write!(f, ", {}", operand)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::GprRole;

    #[test]
    fn test_display() {
        let insn = Instruction::new(
            Opcode::Addi,
            vec![
                Operand::Imm(1),
                Operand::Gpr(GprRole::T0),
                Operand::Gpr(GprRole::T1),
            ],
            SourceLocation::dummy(),
        );
        assert_eq!(format!("{}", insn), "addi 1, T0, T1");
    }

    #[test]
    fn test_replacing_operands_keeps_origin() {
        let origin = SourceLocation::new("a.asm", 9);
        let insn = Instruction::new(Opcode::Ret, vec![], origin.clone())
            .with_annotation(Some("tail".to_string()));
        let rewritten = insn.replacing_operands(vec![Operand::Imm(0)]);
        assert_eq!(rewritten.origin, origin);
        assert_eq!(rewritten.annotation.as_deref(), Some("tail"));
        assert_eq!(rewritten.opcode, Opcode::Ret);
    }
}
