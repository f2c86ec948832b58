//! Operand rendering and operand-level legality
//!
//! The renderer is the last line of defense: the legalization pipeline is
//! responsible for never producing an unencodable operand, so every range
//! check here is a terminal cross-check, not a rewrite point. An error out
//! of this module means a pipeline bug, not a user error.

use capasm_common::BackendError;
use capasm_ir::{Instruction, Operand};

use crate::registers::{fpr_text, gpr_text, scratch_text, WidthClass};

/// Post-legalization window for inline ALU immediates.
pub const IMMEDIATE_WINDOW: std::ops::RangeInclusive<i64> = 0..=4095;

/// The legal displacement window for a base-plus-offset address, keyed on
/// the access width class and on whether the base is a capability (wide)
/// or a compressed-offset integer (narrow). Capability-sized accesses get
/// the asymmetric non-negative wide window.
pub fn offset_window(width: WidthClass, wide_base: bool) -> std::ops::RangeInclusive<i64> {
    match (width, wide_base) {
        (WidthClass::Ptr, true) => 0..=4095,
        (WidthClass::Ptr, false) => -128..=127,
        (_, true) => -255..=4095,
        (_, false) => -32..=31,
    }
}

fn register_text(
    node: &Instruction,
    operand: &Operand,
    width: WidthClass,
) -> Result<String, BackendError> {
    let text = match operand {
        Operand::Gpr(role) => gpr_text(*role, width),
        Operand::Fpr(role) => fpr_text(*role, width),
        Operand::Scratch(reg) => scratch_text(*reg, width),
        _ => None,
    };
    text.ok_or_else(|| BackendError::BadRegisterName {
        name: format!("{}", operand),
        location: node.origin.clone(),
    })
}

/// Render an operand to assembly text at the given width.
pub fn operand_text(
    node: &Instruction,
    operand: &Operand,
    width: WidthClass,
) -> Result<String, BackendError> {
    match operand {
        Operand::Gpr(_) | Operand::Fpr(_) | Operand::Scratch(_) => {
            register_text(node, operand, width)
        }
        Operand::Imm(value) => {
            if !IMMEDIATE_WINDOW.contains(value) {
                return Err(BackendError::BadImmediate {
                    value: *value,
                    location: node.origin.clone(),
                });
            }
            Ok(format!("#{}", value))
        }
        Operand::Address(addr) => {
            if !offset_window(width, addr.wide_base).contains(&addr.offset) {
                return Err(BackendError::UnencodableOffset {
                    offset: addr.offset,
                    opcode: node.opcode.mnemonic().to_string(),
                    location: node.origin.clone(),
                });
            }
            let base_width = if addr.wide_base {
                WidthClass::Ptr
            } else {
                WidthClass::Quad
            };
            Ok(format!(
                "[{}, #{}]",
                register_text(node, &addr.base, base_width)?,
                addr.offset
            ))
        }
        Operand::BaseIndex(bi) => {
            if bi.offset != 0 {
                return Err(BackendError::UnencodableOffset {
                    offset: bi.offset,
                    opcode: node.opcode.mnemonic().to_string(),
                    location: node.origin.clone(),
                });
            }
            let base_width = if bi.wide_base {
                WidthClass::Ptr
            } else {
                WidthClass::Quad
            };
            Ok(format!(
                "[{}, {}, lsl #{}]",
                register_text(node, &bi.base, base_width)?,
                register_text(node, &bi.index, WidthClass::Quad)?,
                bi.scale_shift
            ))
        }
        Operand::AbsoluteAddress(value) => Err(BackendError::UnresolvedOperand {
            detail: format!("absolute address {} reached the selector", value),
            location: node.origin.clone(),
        }),
        Operand::Tmp(tmp) => Err(BackendError::UnresolvedOperand {
            detail: format!("unassigned temporary tmp{} reached the selector", tmp.id),
            location: node.origin.clone(),
        }),
        Operand::LabelRef { label, .. } | Operand::LocalLabelRef { label } => {
            Err(BackendError::UnresolvedOperand {
                detail: format!("label {} in a register or memory slot", label),
                location: node.origin.clone(),
            })
        }
    }
}

/// Render a branch-target operand.
pub fn label_text(node: &Instruction, operand: &Operand) -> Result<String, BackendError> {
    match operand {
        Operand::LabelRef { label, offset: 0 } => Ok(label.clone()),
        Operand::LabelRef { label, offset } => Err(BackendError::UnresolvedOperand {
            detail: format!("label {} with residual offset {}", label, offset),
            location: node.origin.clone(),
        }),
        Operand::LocalLabelRef { label } => Ok(label.clone()),
        other => Err(BackendError::UnresolvedOperand {
            detail: format!("{} where a label was expected", other),
            location: node.origin.clone(),
        }),
    }
}

/// The assembly lines computing the effective address of a memory operand
/// into `destination`.
///
/// For a base-plus-offset address this is a single add. For a scaled
/// base-index at capability width with an 8-byte scale the fused
/// scale-and-add would lose capability derivation bounds, so it becomes a
/// shift into the destination's integer view followed by a
/// capability-typed add; that sequence requires the destination differ
/// from the base register.
pub fn lea_lines(
    node: &Instruction,
    memory: &Operand,
    destination: &Operand,
    width: WidthClass,
) -> Result<Vec<String>, BackendError> {
    match memory {
        Operand::Address(addr) => Ok(vec![format!(
            "add {}, {}, #{}",
            register_text(node, destination, width)?,
            register_text(node, &addr.base, width)?,
            addr.offset
        )]),
        Operand::BaseIndex(bi) => {
            let index_width = if width == WidthClass::Ptr {
                WidthClass::Quad
            } else {
                width
            };
            if width == WidthClass::Ptr && bi.scale_shift == 3 {
                if destination == bi.base.as_ref() {
                    return Err(BackendError::AliasingLeaRequiresDistinctBase {
                        location: node.origin.clone(),
                    });
                }
                return Ok(vec![
                    format!(
                        "lsl {}, {}, #{}",
                        register_text(node, destination, WidthClass::Quad)?,
                        register_text(node, &bi.index, index_width)?,
                        bi.scale_shift
                    ),
                    format!(
                        "add {}, {}, {}",
                        register_text(node, destination, width)?,
                        register_text(node, &bi.base, width)?,
                        register_text(node, destination, WidthClass::Quad)?
                    ),
                ]);
            }
            let scale = if bi.scale_shift != 0 {
                format!(", lsl #{}", bi.scale_shift)
            } else {
                String::new()
            };
            Ok(vec![format!(
                "add {}, {}, {}{}",
                register_text(node, destination, width)?,
                register_text(node, &bi.base, width)?,
                register_text(node, &bi.index, index_width)?,
                scale
            )])
        }
        other => Err(BackendError::UnsupportedAddressingMode {
            opcode: format!("{} {}", node.opcode.mnemonic(), other),
            location: node.origin.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capasm_common::SourceLocation;
    use capasm_ir::{GprRole, Opcode};
    use pretty_assertions::assert_eq;

    fn node(opcode: Opcode) -> Instruction {
        Instruction::new(opcode, vec![], SourceLocation::dummy())
    }

    fn t0() -> Operand {
        Operand::Gpr(GprRole::T0)
    }

    #[test]
    fn test_immediate_window() {
        let n = node(Opcode::Addi);
        assert_eq!(
            operand_text(&n, &Operand::Imm(4095), WidthClass::Word).unwrap(),
            "#4095"
        );
        assert!(matches!(
            operand_text(&n, &Operand::Imm(4096), WidthClass::Word),
            Err(BackendError::BadImmediate { value: 4096, .. })
        ));
        assert!(matches!(
            operand_text(&n, &Operand::Imm(-1), WidthClass::Word),
            Err(BackendError::BadImmediate { .. })
        ));
    }

    #[test]
    fn test_address_base_width_follows_base_kind() {
        let n = node(Opcode::Loadq);
        assert_eq!(
            operand_text(&n, &Operand::address(t0(), 64), WidthClass::Quad).unwrap(),
            "[c0, #64]"
        );
        assert_eq!(
            operand_text(&n, &Operand::narrow_address(t0(), 16), WidthClass::Quad).unwrap(),
            "[x0, #16]"
        );
    }

    #[test]
    fn test_offset_windows_per_width_and_base() {
        let n = node(Opcode::Loadq);
        // Wide word/quad window is -255..4095.
        assert!(operand_text(&n, &Operand::address(t0(), -255), WidthClass::Quad).is_ok());
        assert!(operand_text(&n, &Operand::address(t0(), -256), WidthClass::Quad).is_err());
        // Narrow word/quad window is -32..31.
        assert!(operand_text(&n, &Operand::narrow_address(t0(), -32), WidthClass::Quad).is_ok());
        assert!(operand_text(&n, &Operand::narrow_address(t0(), -33), WidthClass::Quad).is_err());
        // Wide capability window is 0..4095.
        let n = node(Opcode::Loadp);
        assert!(operand_text(&n, &Operand::address(t0(), 0), WidthClass::Ptr).is_ok());
        assert!(operand_text(&n, &Operand::address(t0(), -1), WidthClass::Ptr).is_err());
        // Narrow capability window is -128..127.
        assert!(operand_text(&n, &Operand::narrow_address(t0(), -128), WidthClass::Ptr).is_ok());
        assert!(operand_text(&n, &Operand::narrow_address(t0(), 128), WidthClass::Ptr).is_err());
    }

    #[test]
    fn test_base_index_requires_zero_offset() {
        let n = node(Opcode::Loadq);
        let legal = Operand::base_index(t0(), Operand::Gpr(GprRole::T1), 3);
        assert_eq!(
            operand_text(&n, &legal, WidthClass::Quad).unwrap(),
            "[c0, x1, lsl #3]"
        );
        let mut illegal = legal.clone();
        if let Operand::BaseIndex(ref mut bi) = illegal {
            bi.offset = 8;
        }
        assert!(matches!(
            operand_text(&n, &illegal, WidthClass::Quad),
            Err(BackendError::UnencodableOffset { offset: 8, .. })
        ));
    }

    #[test]
    fn test_unresolved_operands_are_fatal() {
        let n = node(Opcode::Loadq);
        assert!(matches!(
            operand_text(&n, &Operand::AbsoluteAddress(0x1000), WidthClass::Quad),
            Err(BackendError::UnresolvedOperand { .. })
        ));
    }

    #[test]
    fn test_lea_address_is_one_add() {
        let n = node(Opcode::Leap);
        let lines = lea_lines(
            &n,
            &Operand::address(t0(), 24),
            &Operand::Gpr(GprRole::T1),
            WidthClass::Ptr,
        )
        .unwrap();
        assert_eq!(lines, vec!["add c1, c0, #24".to_string()]);
    }

    #[test]
    fn test_lea_capability_scale_three_splits() {
        let n = node(Opcode::Leap);
        let bi = Operand::base_index(t0(), Operand::Gpr(GprRole::T1), 3);
        let lines = lea_lines(&n, &bi, &Operand::Gpr(GprRole::T2), WidthClass::Ptr).unwrap();
        assert_eq!(
            lines,
            vec!["lsl x2, x1, #3".to_string(), "add c2, c0, x2".to_string()]
        );
    }

    #[test]
    fn test_lea_capability_scale_three_rejects_aliasing_base() {
        let n = node(Opcode::Leap);
        let bi = Operand::base_index(t0(), Operand::Gpr(GprRole::T1), 3);
        assert!(matches!(
            lea_lines(&n, &bi, &t0(), WidthClass::Ptr),
            Err(BackendError::AliasingLeaRequiresDistinctBase { .. })
        ));
    }

    #[test]
    fn test_lea_quad_scale_stays_fused() {
        let n = node(Opcode::Leaq);
        let bi = Operand::base_index(t0(), Operand::Gpr(GprRole::T1), 3);
        let lines = lea_lines(&n, &bi, &Operand::Gpr(GprRole::T2), WidthClass::Quad).unwrap();
        assert_eq!(lines, vec!["add x2, x0, x1, lsl #3".to_string()]);
    }

    #[test]
    fn test_label_text() {
        let n = node(Opcode::Jmp);
        assert_eq!(
            label_text(&n, &Operand::label("_llint_op_enter")).unwrap(),
            "_llint_op_enter"
        );
        assert!(label_text(&n, &Operand::Imm(0)).is_err());
    }
}
