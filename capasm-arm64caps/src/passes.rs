//! Backend-specific legalization and the full pipeline
//!
//! Four passes here are particular to the capability target: load/store
//! offset legalization, label-reference materialization, capability-width
//! AND lowering, and capability subtraction lowering. [`legalize`] threads
//! them together with the shared generic passes in the fixed order the
//! selector depends on.

use capasm_common::{BackendError, Options};
use capasm_ir::{
    Address, BaseIndex, Instruction, Opcode, Operand, TmpClass, TmpFactory,
};
use capasm_risc::{
    assign_registers_to_temporaries, lower_hard_branch_ops64, lower_malformed_addresses,
    lower_malformed_immediates, lower_misplaced_addresses, lower_misplaced_immediates, lower_not,
    lower_shift_ops, lower_simple_branch_ops, lower_test,
};
use log::debug;

use crate::operand::IMMEDIATE_WINDOW;
use crate::registers::{EXTRA_FPRS, EXTRA_GPRS};

const STORE_IMMEDIATE_OPCODES: &[Opcode] = &[
    Opcode::Storeb,
    Opcode::Storei,
    Opcode::Storep,
    Opcode::Storeq,
    Opcode::Storev,
];

/// Access size in bytes implied by an opcode, for address legality.
/// Vector/heap-reference accesses are 8 or 16 bytes depending on whether
/// the build represents heap references as 64-bit offsets or full
/// capabilities.
fn heap_access_size(node: &Instruction, options: &Options) -> Result<i64, BackendError> {
    if matches!(
        node.opcode,
        Opcode::Loadv | Opcode::Loadvmc | Opcode::Storev
    ) {
        return Ok(if options.heap_offset_refs { 8 } else { 16 });
    }
    let m = node.opcode.mnemonic();
    let size = if matches!(m, "loadb" | "loadbsi" | "loadbsq" | "storeb")
        || m.starts_with("btb")
        || m.starts_with("bb")
        || m.starts_with("cb")
    {
        1
    } else if matches!(m, "loadh" | "loadhsi" | "loadhsq" | "storeh") {
        2
    } else if matches!(
        m,
        "loadi"
            | "loadis"
            | "storei"
            | "addi"
            | "addis"
            | "andi"
            | "lshifti"
            | "muli"
            | "negi"
            | "noti"
            | "ori"
            | "rshifti"
            | "urshifti"
            | "subi"
            | "subis"
            | "xori"
            | "smulli"
            | "leai"
            | "printi"
    ) || m.starts_with("bti")
        || m.starts_with("bi")
        || m.starts_with("ci")
    {
        4
    } else if matches!(
        m,
        "loadq"
            | "storeq"
            | "loadd"
            | "stored"
            | "lshiftq"
            | "negq"
            | "rshiftq"
            | "urshiftq"
            | "addq"
            | "addqs"
            | "subq"
            | "subqs"
            | "mulq"
            | "andq"
            | "orq"
            | "xorq"
            | "addd"
            | "divd"
            | "subd"
            | "muld"
            | "sqrtd"
            | "leaq"
    ) || m.starts_with("btq")
        || m.starts_with("bq")
        || m.starts_with("bd")
    {
        8
    } else if matches!(
        m,
        "loadp"
            | "storep"
            | "lshiftp"
            | "negp"
            | "rshiftp"
            | "urshiftp"
            | "addp"
            | "addps"
            | "mulp"
            | "andp"
            | "orp"
            | "subp"
            | "xorp"
            | "jmp"
            | "call"
            | "leap"
            | "printp"
    ) || m.starts_with("btp")
        || m.starts_with("bp")
        || m.starts_with("cp")
    {
        16
    } else {
        return Err(BackendError::UnsupportedAddressingMode {
            opcode: m.to_string(),
            location: node.origin.clone(),
        });
    };
    Ok(size)
}

fn heap_offset_window(size: i64, wide_base: bool) -> std::ops::RangeInclusive<i64> {
    if size == 16 {
        if wide_base {
            0..=4095
        } else {
            -128..=127
        }
    } else if wide_base {
        -255..=4095
    } else {
        -32..=31
    }
}

/// Legality predicate for the size-driven address pass (pipeline step 8).
fn heap_address_is_legal(
    node: &Instruction,
    operand: &Operand,
    options: &Options,
) -> Result<bool, BackendError> {
    let size = heap_access_size(node, options)?;
    Ok(match operand {
        Operand::BaseIndex(bi) => {
            bi.offset == 0
                && (node.opcode.is_lea() || bi.scale() == 1 || bi.scale() == size)
        }
        Operand::Address(addr) => heap_offset_window(size, addr.wide_base).contains(&addr.offset),
        _ => false,
    })
}

/// Legality predicate for the final transfer-oriented address pass
/// (pipeline step 13). Loads and address computations take any remaining
/// address shape; stores cannot encode a negative base-plus-offset.
fn transfer_address_is_legal(
    node: &Instruction,
    operand: &Operand,
) -> Result<bool, BackendError> {
    if node.opcode.is_load() || node.opcode.is_lea() || node.opcode.is_print() {
        return Ok(true);
    }
    if node.opcode.is_store() {
        return Ok(match operand {
            Operand::Address(addr) => addr.offset >= 0,
            _ => true,
        });
    }
    Err(BackendError::UnsupportedAddressingMode {
        opcode: node.opcode.mnemonic().to_string(),
        location: node.origin.clone(),
    })
}

/// Offset legality for a direct load/store encoding: the window depends on
/// the access class (capability-sized opcodes get the asymmetric window)
/// and 64-bit-suffixed opcodes additionally require 8-byte alignment.
fn load_store_address_is_malformed(opcode: Opcode, operand: &Operand) -> bool {
    let Operand::Address(addr) = operand else {
        return false;
    };
    let m = opcode.mnemonic();
    let window = if m.ends_with('p') {
        if addr.wide_base {
            0..=4095
        } else {
            -128..=127
        }
    } else if addr.wide_base {
        -255..=4095
    } else {
        -32..=31
    };
    let mut malformed = !window.contains(&addr.offset);
    if m.ends_with('q') {
        malformed |= addr.offset % 8 != 0;
    }
    malformed
}

/// Rewrite loads and stores whose offset has no direct encoding: the
/// offset moves into a temporary and the access becomes an unscaled
/// base-index through it.
pub fn legalize_load_store_addresses(
    list: &[Instruction],
    tmps: &mut TmpFactory,
) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let slot = if node.opcode.is_store() {
            1
        } else if node.opcode.is_load() {
            0
        } else {
            new_list.push(node.clone());
            continue;
        };
        let Some(operand) = node.operands.get(slot) else {
            new_list.push(node.clone());
            continue;
        };
        if !load_store_address_is_malformed(node.opcode, operand) {
            new_list.push(node.clone());
            continue;
        }
        let Operand::Address(addr) = operand.clone() else {
            unreachable!("malformed load/store operand is always an address");
        };
        debug!(
            "rerouting {} offset {} through an index register",
            node.opcode, addr.offset
        );
        let tmp = tmps.fresh(TmpClass::Gpr);
        new_list.push(Instruction::new(
            Opcode::Move,
            vec![Operand::Imm(addr.offset), Operand::Tmp(tmp)],
            node.origin.clone(),
        ));
        let rewritten = Operand::BaseIndex(BaseIndex {
            base: addr.base,
            index: Box::new(Operand::Tmp(tmp)),
            scale_shift: 0,
            offset: 0,
            wide_base: addr.wide_base,
        });
        let mut operands = node.operands.clone();
        operands[slot] = rewritten;
        new_list.push(node.replacing_operands(operands));
    }
    new_list
}

/// Rewrite loads (and capability lea) whose source is a bare label
/// reference: compute the global's address into a temporary first, then
/// access through it with the reference's byte offset as displacement.
pub fn lower_label_references(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let applies = node.opcode.is_load() || node.opcode == Opcode::Leap;
        let label = match node.operands.first() {
            Some(Operand::LabelRef { label, offset }) if applies => {
                Some((label.clone(), *offset))
            }
            _ => None,
        };
        let Some((label, offset)) = label else {
            new_list.push(node.clone());
            continue;
        };
        let tmp = tmps.fresh(TmpClass::Gpr);
        new_list.push(Instruction::new(
            Opcode::Globaladdr,
            vec![Operand::LabelRef { label, offset: 0 }, Operand::Tmp(tmp)],
            node.origin.clone(),
        ));
        let mut operands = node.operands.clone();
        operands[0] = Operand::Address(Address {
            base: Box::new(Operand::Tmp(tmp)),
            offset,
            wide_base: true,
        });
        new_list.push(node.replacing_operands(operands));
    }
    new_list
}

fn two_or_three_operand(node: &Instruction) -> (Operand, Operand, Operand) {
    if node.operands.len() == 3 {
        (
            node.operands[0].clone(),
            node.operands[1].clone(),
            node.operands[2].clone(),
        )
    } else {
        (
            node.operands[1].clone(),
            node.operands[0].clone(),
            node.operands[1].clone(),
        )
    }
}

/// Lower bitwise AND forms the hardware cannot express. A zero mask
/// collapses to a move (capability-preserving for `andp`). Any other
/// capability-width AND becomes a 64-bit AND followed by a capability
/// reconstruction from the unmasked source, routed through a temporary
/// when the destination aliases an input.
pub fn lower_malformed_and(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        if !matches!(node.opcode, Opcode::Andi | Opcode::Andp | Opcode::Andq) {
            new_list.push(node.clone());
            continue;
        }
        let (src1, src2, dst) = two_or_three_operand(node);
        if src2.imm_value() == Some(0) {
            if src1 != dst {
                let move_opcode = if node.opcode == Opcode::Andp {
                    Opcode::Movep
                } else {
                    Opcode::Move
                };
                new_list.push(Instruction::new(
                    move_opcode,
                    vec![src1, dst],
                    node.origin.clone(),
                ));
            }
        } else if node.opcode == Opcode::Andp {
            let original_dst = dst.clone();
            let dst = if dst == src1 || dst == src2 {
                Operand::Tmp(tmps.fresh(TmpClass::Gpr))
            } else {
                dst
            };
            new_list.push(Instruction::new(
                Opcode::Andq,
                vec![src1.clone(), src2, dst.clone()],
                node.origin.clone(),
            ));
            new_list.push(Instruction::new(
                Opcode::Cvtz,
                vec![src1, dst, original_dst],
                node.origin.clone(),
            ));
        } else {
            new_list.push(node.clone());
        }
    }
    new_list
}

/// Lower capability subtraction with a register subtrahend. The hardware
/// form only takes an immediate displacement, so a register subtrahend
/// becomes a 64-bit subtract followed by a capability reconstruction from
/// the minuend. The stack pointer cannot participate in the 64-bit
/// subtract directly and is copied into a temporary first; a destination
/// aliasing the minuend is routed through the temporary and copied back.
pub fn lower_malformed_sub(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        if node.opcode != Opcode::Subp {
            new_list.push(node.clone());
            continue;
        }
        let (mut src1, src2, mut dst) = two_or_three_operand(node);
        let tmp = Operand::Tmp(tmps.fresh(TmpClass::Gpr));

        if src1.is_sp() {
            new_list.push(Instruction::new(
                Opcode::Movep,
                vec![src1, tmp.clone()],
                node.origin.clone(),
            ));
            src1 = tmp.clone();
        }

        let original_dst = dst.clone();
        if dst.is_sp() || (dst == src1 && !src2.is_immediate()) {
            dst = tmp.clone();
        }

        if src2.is_immediate() {
            new_list.push(
                Instruction::new(
                    Opcode::Subp,
                    vec![src1, src2, dst.clone()],
                    node.origin.clone(),
                )
                .with_annotation(node.annotation.clone()),
            );
        } else {
            new_list.push(
                Instruction::new(
                    Opcode::Subq,
                    vec![src1.clone(), src2, dst.clone()],
                    node.origin.clone(),
                )
                .with_annotation(node.annotation.clone()),
            );
            new_list.push(Instruction::new(
                Opcode::Cvtz,
                vec![src1, dst.clone(), dst.clone()],
                node.origin.clone(),
            ));
        }

        if original_dst != dst {
            new_list.push(Instruction::new(
                Opcode::Movep,
                vec![dst, original_dst],
                node.origin.clone(),
            ));
        }
    }
    new_list
}

/// The full legalization pipeline. Order is load-bearing: each pass
/// assumes the forms the earlier ones eliminate are gone, and the two
/// allocator invocations at the end remove every temporary the passes
/// introduced.
pub fn legalize(
    list: &[Instruction],
    options: &Options,
) -> Result<Vec<Instruction>, BackendError> {
    let mut tmps = TmpFactory::new();
    let result = lower_not(list);
    let result = lower_simple_branch_ops(&result);
    let result = lower_hard_branch_ops64(&result);
    let result = lower_shift_ops(&result, &mut tmps);
    let result = legalize_load_store_addresses(&result, &mut tmps);
    let result = lower_label_references(&result, &mut tmps);
    let result = lower_malformed_and(&result, &mut tmps);
    let result = lower_malformed_addresses(&result, &mut tmps, |node, operand| {
        heap_address_is_legal(node, operand, options)
    })?;
    let result = lower_misplaced_immediates(&result, &mut tmps, STORE_IMMEDIATE_OPCODES);
    let result = lower_malformed_immediates(&result, &mut tmps, IMMEDIATE_WINDOW);
    let result = lower_malformed_sub(&result, &mut tmps);
    let result = lower_misplaced_addresses(&result, &mut tmps);
    let result = lower_malformed_addresses(&result, &mut tmps, transfer_address_is_legal)?;
    let result = lower_test(&result, &mut tmps);
    let result = assign_registers_to_temporaries(&result, TmpClass::Gpr, EXTRA_GPRS)?;
    let result = assign_registers_to_temporaries(&result, TmpClass::Fpr, EXTRA_FPRS)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capasm_common::SourceLocation;
    use capasm_ir::GprRole;
    use pretty_assertions::assert_eq;

    fn insn(opcode: Opcode, operands: Vec<Operand>) -> Instruction {
        Instruction::new(opcode, operands, SourceLocation::dummy())
    }

    fn t(role: GprRole) -> Operand {
        Operand::Gpr(role)
    }

    fn options() -> Options {
        Options::default()
    }

    #[test]
    fn test_access_sizes() {
        let opts = options();
        let size = |op: Opcode| heap_access_size(&insn(op, vec![]), &opts).unwrap();
        assert_eq!(size(Opcode::Loadb), 1);
        assert_eq!(size(Opcode::Bbeq), 1);
        assert_eq!(size(Opcode::Loadh), 2);
        assert_eq!(size(Opcode::Loadi), 4);
        assert_eq!(size(Opcode::Bineq), 4);
        assert_eq!(size(Opcode::Loadq), 8);
        assert_eq!(size(Opcode::Stored), 8);
        assert_eq!(size(Opcode::Loadp), 16);
        assert_eq!(size(Opcode::Jmp), 16);
        assert_eq!(size(Opcode::Loadv), 16);
    }

    #[test]
    fn test_vector_access_size_follows_options() {
        let opts = Options {
            heap_offset_refs: true,
        };
        assert_eq!(
            heap_access_size(&insn(Opcode::Loadv, vec![]), &opts).unwrap(),
            8
        );
        assert_eq!(
            heap_access_size(&insn(Opcode::Storev, vec![]), &opts).unwrap(),
            8
        );
    }

    #[test]
    fn test_access_size_rejects_unknown_opcode() {
        assert!(heap_access_size(&insn(Opcode::Ret, vec![]), &options()).is_err());
    }

    #[test]
    fn test_load_with_huge_offset_becomes_indexed() {
        let mut tmps = TmpFactory::new();
        let out = legalize_load_store_addresses(
            &[insn(
                Opcode::Loadi,
                vec![Operand::address(t(GprRole::T0), 5000), t(GprRole::T1)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::Move);
        assert_eq!(out[0].operands[0], Operand::Imm(5000));
        match &out[1].operands[0] {
            Operand::BaseIndex(bi) => {
                assert_eq!(bi.scale_shift, 0);
                assert_eq!(bi.offset, 0);
                assert!(bi.wide_base);
            }
            other => panic!("expected base-index, got {:?}", other),
        }
        // The rewritten access is legal, so a second run is a no-op.
        assert_eq!(legalize_load_store_addresses(&out, &mut tmps), out);
    }

    #[test]
    fn test_load_within_window_untouched() {
        let mut tmps = TmpFactory::new();
        let input = vec![insn(
            Opcode::Loadi,
            vec![Operand::address(t(GprRole::T0), 4000), t(GprRole::T1)],
        )];
        let out = legalize_load_store_addresses(&input, &mut tmps);
        assert_eq!(out, input);
    }

    #[test]
    fn test_quad_load_requires_aligned_offset() {
        let mut tmps = TmpFactory::new();
        let out = legalize_load_store_addresses(
            &[insn(
                Opcode::Loadq,
                vec![Operand::address(t(GprRole::T0), 12), t(GprRole::T1)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::Move);
    }

    #[test]
    fn test_capability_store_rejects_negative_offset() {
        let mut tmps = TmpFactory::new();
        let out = legalize_load_store_addresses(
            &[insn(
                Opcode::Storep,
                vec![t(GprRole::T1), Operand::address(t(GprRole::T0), -16)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        match &out[1].operands[1] {
            Operand::BaseIndex(_) => {}
            other => panic!("expected base-index, got {:?}", other),
        }
    }

    #[test]
    fn test_label_load_goes_through_globaladdr() {
        let mut tmps = TmpFactory::new();
        let out = lower_label_references(
            &[insn(
                Opcode::Loadp,
                vec![
                    Operand::LabelRef {
                        label: "_g_config".to_string(),
                        offset: 24,
                    },
                    t(GprRole::T0),
                ],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::Globaladdr);
        assert_eq!(
            out[0].operands[0],
            Operand::LabelRef {
                label: "_g_config".to_string(),
                offset: 0
            }
        );
        match &out[1].operands[0] {
            Operand::Address(addr) => {
                assert_eq!(addr.offset, 24);
                assert!(addr.wide_base);
            }
            other => panic!("expected address, got {:?}", other),
        }
    }

    #[test]
    fn test_and_zero_mask_collapses_to_move() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_and(
            &[insn(
                Opcode::Andp,
                vec![t(GprRole::T0), Operand::Imm(0), t(GprRole::T1)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode, Opcode::Movep);
        assert_eq!(out[0].operands, vec![t(GprRole::T0), t(GprRole::T1)]);
    }

    #[test]
    fn test_and_zero_mask_on_self_is_dropped() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_and(
            &[insn(Opcode::Andq, vec![Operand::Imm(0), t(GprRole::T0)])],
            &mut tmps,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_capability_and_reconstructs() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_and(
            &[insn(
                Opcode::Andp,
                vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::Andq);
        assert_eq!(out[1].opcode, Opcode::Cvtz);
        assert_eq!(out[1].operands[0], t(GprRole::T0));
        assert_eq!(out[1].operands[2], t(GprRole::T2));
        assert_eq!(lower_malformed_and(&out, &mut tmps), out);
    }

    #[test]
    fn test_capability_and_aliasing_destination_uses_tmp() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_and(
            &[insn(
                Opcode::Andp,
                vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T0)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].operands[2], Operand::Tmp(_)));
        assert_eq!(out[1].operands[2], t(GprRole::T0));
    }

    #[test]
    fn test_word_and_untouched() {
        let mut tmps = TmpFactory::new();
        let input = vec![insn(
            Opcode::Andi,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        )];
        assert_eq!(lower_malformed_and(&input, &mut tmps), input);
    }

    #[test]
    fn test_subp_immediate_stays_direct() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_sub(
            &[insn(
                Opcode::Subp,
                vec![t(GprRole::T0), Operand::Imm(16), t(GprRole::T1)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode, Opcode::Subp);
    }

    #[test]
    fn test_subp_register_subtrahend_reconstructs() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_sub(
            &[insn(
                Opcode::Subp,
                vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode, Opcode::Subq);
        assert_eq!(out[1].opcode, Opcode::Cvtz);
        assert_eq!(lower_malformed_sub(&out, &mut tmps), out);
    }

    #[test]
    fn test_subp_from_stack_pointer_copies_first() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_sub(
            &[insn(
                Opcode::Subp,
                vec![t(GprRole::Sp), t(GprRole::T1), t(GprRole::T2)],
            )],
            &mut tmps,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].opcode, Opcode::Movep);
        assert_eq!(out[0].operands[0], t(GprRole::Sp));
        assert_eq!(out[1].opcode, Opcode::Subq);
        assert_eq!(out[2].opcode, Opcode::Cvtz);
    }

    #[test]
    fn test_subp_aliasing_destination_copies_back() {
        let mut tmps = TmpFactory::new();
        let out = lower_malformed_sub(
            &[insn(
                Opcode::Subp,
                vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T0)],
            )],
            &mut tmps,
        );
        // subq into tmp, cvtz into tmp, copy back to t0.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].opcode, Opcode::Subq);
        assert!(matches!(out[0].operands[2], Operand::Tmp(_)));
        assert_eq!(out[2].opcode, Opcode::Movep);
        assert_eq!(out[2].operands[1], t(GprRole::T0));
    }

    #[test]
    fn test_legalize_ends_with_no_temporaries() {
        let list = vec![
            insn(
                Opcode::Loadi,
                vec![Operand::address(t(GprRole::T0), 70000), t(GprRole::T1)],
            ),
            insn(
                Opcode::Subp,
                vec![t(GprRole::Sp), t(GprRole::T1), t(GprRole::T2)],
            ),
        ];
        let out = legalize(&list, &options()).unwrap();
        for node in &out {
            for operand in &node.operands {
                operand.for_each_tmp(&mut |tmp| {
                    panic!("temporary tmp{} survived the pipeline", tmp.id)
                });
            }
        }
    }
}
