//! Architecture-independent lowering passes
//!
//! These run before (and between) the backend-specific passes. Each one
//! removes a single family of forms that RISC-shaped targets cannot encode
//! directly: fused arithmetic branches, register shift counts, immediates
//! and addresses in operand slots the ISA has no encoding for, and the
//! composite test-and-branch pseudo-ops.

use capasm_common::BackendError;
use capasm_ir::{Address, Instruction, Opcode, Operand, Tmp, TmpClass, TmpFactory};
use log::trace;

fn move_imm(value: i64, tmp: Tmp, node: &Instruction) -> Instruction {
    Instruction::new(
        Opcode::Move,
        vec![Operand::Imm(value), Operand::Tmp(tmp)],
        node.origin.clone(),
    )
}

/// Replace `noti`/`notq` with an exclusive-or against all-ones. The
/// malformed-immediate pass later materializes the -1 into a temporary.
pub fn lower_not(list: &[Instruction]) -> Vec<Instruction> {
    list.iter()
        .map(|node| match node.opcode {
            Opcode::Noti => node.replacing_operands(vec![
                Operand::Imm(-1),
                node.operands[0].clone(),
            ])
            .retagged(Opcode::Xori),
            Opcode::Notq => node.replacing_operands(vec![
                Operand::Imm(-1),
                node.operands[0].clone(),
            ])
            .retagged(Opcode::Xorq),
            _ => node.clone(),
        })
        .collect()
}

/// What a fused arithmetic branch turns into once the arithmetic has been
/// split out: either a bare flag branch, or a compare-branch against zero
/// on the arithmetic destination (for opcodes with no flag-setting form).
enum FusionBranch {
    Flag(Opcode),
    CompareZero(Opcode),
}

fn lower_branch_fusions(
    list: &[Instruction],
    classify: impl Fn(Opcode) -> Option<(Opcode, FusionBranch)>,
) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let Some((arith, branch)) = classify(node.opcode) else {
            new_list.push(node.clone());
            continue;
        };
        let Some((label, arith_operands)) = node.operands.split_last() else {
            new_list.push(node.clone());
            continue;
        };
        let Some(destination) = arith_operands.last().cloned() else {
            new_list.push(node.clone());
            continue;
        };
        new_list.push(node.replacing_operands(arith_operands.to_vec()).retagged(arith));
        match branch {
            FusionBranch::Flag(op) => {
                new_list.push(Instruction::new(op, vec![label.clone()], node.origin.clone()));
            }
            FusionBranch::CompareZero(op) => {
                new_list.push(Instruction::new(
                    op,
                    vec![destination.clone(), Operand::Imm(0), label.clone()],
                    node.origin.clone(),
                ));
            }
        }
    }
    new_list
}

/// Split 32-bit fused arithmetic branches (`baddiz`, `bsubinz`, `boris`,
/// ...) into a flag-setting arithmetic op followed by a condition branch.
pub fn lower_simple_branch_ops(list: &[Instruction]) -> Vec<Instruction> {
    use FusionBranch::{CompareZero, Flag};
    lower_branch_fusions(list, |op| match op {
        Opcode::Baddiz => Some((Opcode::Addis, Flag(Opcode::Bz))),
        Opcode::Baddinz => Some((Opcode::Addis, Flag(Opcode::Bnz))),
        Opcode::Baddis => Some((Opcode::Addis, Flag(Opcode::Bs))),
        Opcode::Baddio => Some((Opcode::Addis, Flag(Opcode::Bo))),
        Opcode::Bsubiz => Some((Opcode::Subis, Flag(Opcode::Bz))),
        Opcode::Bsubinz => Some((Opcode::Subis, Flag(Opcode::Bnz))),
        Opcode::Bsubis => Some((Opcode::Subis, Flag(Opcode::Bs))),
        Opcode::Bsubio => Some((Opcode::Subis, Flag(Opcode::Bo))),
        Opcode::Boriz => Some((Opcode::Ori, CompareZero(Opcode::Bieq))),
        Opcode::Borinz => Some((Opcode::Ori, CompareZero(Opcode::Bineq))),
        Opcode::Boris => Some((Opcode::Ori, CompareZero(Opcode::Bilt))),
        _ => None,
    })
}

/// The 64-bit counterpart of [`lower_simple_branch_ops`].
pub fn lower_hard_branch_ops64(list: &[Instruction]) -> Vec<Instruction> {
    use FusionBranch::{CompareZero, Flag};
    lower_branch_fusions(list, |op| match op {
        Opcode::Baddqz => Some((Opcode::Addqs, Flag(Opcode::Bz))),
        Opcode::Baddqnz => Some((Opcode::Addqs, Flag(Opcode::Bnz))),
        Opcode::Baddqs => Some((Opcode::Addqs, Flag(Opcode::Bs))),
        Opcode::Baddqo => Some((Opcode::Addqs, Flag(Opcode::Bo))),
        Opcode::Bsubqz => Some((Opcode::Subqs, Flag(Opcode::Bz))),
        Opcode::Bsubqnz => Some((Opcode::Subqs, Flag(Opcode::Bnz))),
        Opcode::Bsubqs => Some((Opcode::Subqs, Flag(Opcode::Bs))),
        Opcode::Bsubqo => Some((Opcode::Subqs, Flag(Opcode::Bo))),
        Opcode::Borqz => Some((Opcode::Orq, CompareZero(Opcode::Bqeq))),
        Opcode::Borqnz => Some((Opcode::Orq, CompareZero(Opcode::Bqneq))),
        Opcode::Borqs => Some((Opcode::Orq, CompareZero(Opcode::Bqlt))),
        _ => None,
    })
}

/// Mask register shift counts to the operand width. Temporaries are never
/// masked again: the only temporaries that can appear in a count slot are
/// the ones this pass introduced, and they already hold masked values.
pub fn lower_shift_ops(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let mask: i64 = match node.opcode {
            Opcode::Lshifti | Opcode::Rshifti | Opcode::Urshifti => 31,
            Opcode::Lshiftq
            | Opcode::Rshiftq
            | Opcode::Urshiftq
            | Opcode::Lshiftp
            | Opcode::Rshiftp
            | Opcode::Urshiftp => 63,
            _ => {
                new_list.push(node.clone());
                continue;
            }
        };
        let count_slot = node.operands.len() - 2;
        let count = &node.operands[count_slot];
        let needs_mask = count.is_register() && !matches!(count, Operand::Tmp(_));
        if !needs_mask {
            new_list.push(node.clone());
            continue;
        }
        let and_op = if mask == 31 { Opcode::Andi } else { Opcode::Andq };
        let tmp = tmps.fresh(TmpClass::Gpr);
        new_list.push(Instruction::new(
            and_op,
            vec![count.clone(), Operand::Imm(mask), Operand::Tmp(tmp)],
            node.origin.clone(),
        ));
        let mut operands = node.operands.clone();
        operands[count_slot] = Operand::Tmp(tmp);
        new_list.push(node.replacing_operands(operands));
    }
    new_list
}

/// Materialize every memory operand the `legal` predicate rejects into a
/// fresh temporary holding the effective address, substituting a plain
/// zero-offset address. The predicate is consulted only for memory
/// operands and may fail for opcodes it does not understand.
pub fn lower_malformed_addresses(
    list: &[Instruction],
    tmps: &mut TmpFactory,
    legal: impl Fn(&Instruction, &Operand) -> Result<bool, BackendError>,
) -> Result<Vec<Instruction>, BackendError> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let mut operands = node.operands.clone();
        let mut rewrote = false;
        for slot in 0..operands.len() {
            if !operands[slot].is_memory() || legal(node, &operands[slot])? {
                continue;
            }
            trace!("materializing address operand of {}", node.opcode);
            let replacement = match operands[slot].clone() {
                Operand::Address(addr) => {
                    let tmp = tmps.fresh(TmpClass::Gpr);
                    let add_op = if addr.wide_base { Opcode::Addp } else { Opcode::Addq };
                    new_list.push(move_imm(addr.offset, tmp, node));
                    new_list.push(Instruction::new(
                        add_op,
                        vec![(*addr.base).clone(), Operand::Tmp(tmp), Operand::Tmp(tmp)],
                        node.origin.clone(),
                    ));
                    Operand::Address(Address {
                        base: Box::new(Operand::Tmp(tmp)),
                        offset: 0,
                        wide_base: addr.wide_base,
                    })
                }
                Operand::BaseIndex(bi) => {
                    let wide = bi.wide_base;
                    let lea_op = if wide { Opcode::Leap } else { Opcode::Leaq };
                    let residual = bi.offset;
                    let tmp = tmps.fresh(TmpClass::Gpr);
                    let mut scaled = bi;
                    scaled.offset = 0;
                    new_list.push(Instruction::new(
                        lea_op,
                        vec![Operand::BaseIndex(scaled), Operand::Tmp(tmp)],
                        node.origin.clone(),
                    ));
                    let base_tmp = if residual != 0 {
                        let offset_tmp = tmps.fresh(TmpClass::Gpr);
                        let add_op = if wide { Opcode::Addp } else { Opcode::Addq };
                        new_list.push(move_imm(residual, offset_tmp, node));
                        new_list.push(Instruction::new(
                            add_op,
                            vec![
                                Operand::Tmp(tmp),
                                Operand::Tmp(offset_tmp),
                                Operand::Tmp(offset_tmp),
                            ],
                            node.origin.clone(),
                        ));
                        offset_tmp
                    } else {
                        tmp
                    };
                    Operand::Address(Address {
                        base: Box::new(Operand::Tmp(base_tmp)),
                        offset: 0,
                        wide_base: wide,
                    })
                }
                Operand::AbsoluteAddress(value) => {
                    let tmp = tmps.fresh(TmpClass::Gpr);
                    new_list.push(move_imm(value, tmp, node));
                    Operand::Address(Address {
                        base: Box::new(Operand::Tmp(tmp)),
                        offset: 0,
                        wide_base: false,
                    })
                }
                other => other,
            };
            operands[slot] = replacement;
            rewrote = true;
        }
        if rewrote {
            new_list.push(node.replacing_operands(operands));
        } else {
            new_list.push(node.clone());
        }
    }
    Ok(new_list)
}

/// Stores cannot take an immediate in the value slot; move it through a
/// temporary first.
pub fn lower_misplaced_immediates(
    list: &[Instruction],
    tmps: &mut TmpFactory,
    store_opcodes: &[Opcode],
) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        if store_opcodes.contains(&node.opcode) {
            if let Some(value) = node.operands[0].imm_value() {
                let tmp = tmps.fresh(TmpClass::Gpr);
                new_list.push(move_imm(value, tmp, node));
                let mut operands = node.operands.clone();
                operands[0] = Operand::Tmp(tmp);
                new_list.push(node.replacing_operands(operands));
                continue;
            }
        }
        new_list.push(node.clone());
    }
    new_list
}

fn flipped_add_sub(op: Opcode) -> Option<Opcode> {
    match op {
        Opcode::Addi => Some(Opcode::Subi),
        Opcode::Addis => Some(Opcode::Subis),
        Opcode::Addq => Some(Opcode::Subq),
        Opcode::Addqs => Some(Opcode::Subqs),
        Opcode::Addp => Some(Opcode::Subp),
        Opcode::Subi => Some(Opcode::Addi),
        Opcode::Subis => Some(Opcode::Addis),
        Opcode::Subq => Some(Opcode::Addq),
        Opcode::Subqs => Some(Opcode::Addqs),
        Opcode::Subp => Some(Opcode::Addp),
        _ => None,
    }
}

/// Immediate operands outside `window` get materialized into a temporary
/// via `move` (which can synthesize any 64-bit constant). An addition or
/// subtraction whose negated immediate fits is flipped to the opposite
/// opcode instead, which saves the materialization.
pub fn lower_malformed_immediates(
    list: &[Instruction],
    tmps: &mut TmpFactory,
    window: std::ops::RangeInclusive<i64>,
) -> Vec<Instruction> {
    // Opcodes whose immediates are not ALU immediates: either `move` can
    // hold anything, or the value is consumed as raw text at emission.
    const EXEMPT: &[Opcode] = &[
        Opcode::Move,
        Opcode::Movep,
        Opcode::Peek,
        Opcode::Poke,
        Opcode::Bfiq,
        Opcode::Pcrtoaddr,
        Opcode::Globaladdr,
    ];

    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        if EXEMPT.contains(&node.opcode) {
            new_list.push(node.clone());
            continue;
        }
        let mut node = node.clone();
        if let Some(flipped) = flipped_add_sub(node.opcode) {
            // The immediate slot is operand 0 in two-operand form. In
            // three-operand form `add` takes it first and `sub` second, so
            // flipping also swaps the slot.
            let arity = node.operands.len();
            let slot = match (node.opcode.mnemonic().starts_with("add"), arity) {
                (_, 2) => Some(0),
                (true, 3) => Some(0),
                (false, 3) => Some(1),
                _ => None,
            };
            if let Some(slot) = slot {
                if let Some(value) = node.operands[slot].imm_value() {
                    // `i64::MIN` has no negation; it falls through to
                    // plain materialization below.
                    let negated = value.checked_neg().filter(|n| window.contains(n));
                    if !window.contains(&value) {
                        if let Some(negated) = negated {
                            let mut operands = node.operands.clone();
                            operands[slot] = Operand::Imm(negated);
                            if arity == 3 {
                                let other = if slot == 0 { 1 } else { 0 };
                                operands.swap(slot, other);
                            }
                            node = node.replacing_operands(operands).retagged(flipped);
                        }
                    }
                }
            }
        }
        let mut operands = node.operands.clone();
        let mut rewrote = false;
        let is_test = node.opcode.mnemonic().starts_with("bt");
        for slot in 0..operands.len() {
            if let Some(value) = operands[slot].imm_value() {
                // An all-ones test mask disappears entirely when the
                // test-and-branch pass runs later; leave it alone.
                if is_test && value == -1 {
                    continue;
                }
                if !window.contains(&value) {
                    let tmp = tmps.fresh(TmpClass::Gpr);
                    new_list.push(move_imm(value, tmp, &node));
                    operands[slot] = Operand::Tmp(tmp);
                    rewrote = true;
                }
            }
        }
        if rewrote {
            new_list.push(node.replacing_operands(operands));
        } else {
            new_list.push(node);
        }
    }
    new_list
}

#[derive(Clone, Copy, PartialEq)]
enum Slot {
    Src,
    Dst,
    SrcDst,
}

/// Load/store opcode pair for a width suffix character.
fn transfer_ops(width: char) -> (Opcode, Opcode) {
    match width {
        'i' => (Opcode::Loadi, Opcode::Storei),
        'b' => (Opcode::Loadb, Opcode::Storeb),
        'p' => (Opcode::Loadp, Opcode::Storep),
        'q' => (Opcode::Loadq, Opcode::Storeq),
        'd' => (Opcode::Loadd, Opcode::Stored),
        _ => unreachable!("no transfer width {}", width),
    }
}

/// Width suffix and operand slot roles for opcodes whose address operands
/// must be routed through a register. Loads, stores, lea and print keep
/// their address operands; everything else gets them replaced here.
fn misplaced_address_shape(node: &Instruction) -> Option<(char, Vec<Slot>)> {
    use Opcode::*;
    let tac_width = match node.opcode {
        Addi | Addis | Subi | Subis | Andi | Ori | Xori | Muli | Negi | Lshifti | Rshifti
        | Urshifti | Smulli => Some('i'),
        Addq | Addqs | Subq | Subqs | Andq | Orq | Xorq | Mulq | Negq | Lshiftq | Rshiftq
        | Urshiftq => Some('q'),
        Addp | Addps | Subp | Andp | Orp | Xorp | Mulp | Negp | Lshiftp | Rshiftp | Urshiftp => {
            Some('p')
        }
        _ => None,
    };
    if let Some(width) = tac_width {
        let slots = match node.operands.len() {
            1 => vec![Slot::SrcDst],
            2 => vec![Slot::Src, Slot::SrcDst],
            _ => {
                let mut slots = vec![Slot::Src; node.operands.len() - 1];
                slots.push(Slot::Dst);
                slots
            }
        };
        return Some((width, slots));
    }

    let mnemonic = node.opcode.mnemonic();
    let branch_width = |width: char| {
        let mut slots = vec![Slot::Src; node.operands.len() - 1];
        slots.push(Slot::Src); // last operand is a label, never rewritten
        Some((width, slots))
    };
    if mnemonic.starts_with("bt") {
        return branch_width(mnemonic.chars().nth(2).unwrap_or('q'));
    }
    if mnemonic.starts_with('b') && mnemonic.len() > 2 {
        if let Some(width @ ('i' | 'b' | 'p' | 'q' | 'd')) = mnemonic.chars().nth(1) {
            return branch_width(width);
        }
    }
    if mnemonic.starts_with('c') {
        if let Some(width @ ('i' | 'b' | 'p' | 'q')) = mnemonic.chars().nth(1) {
            let mut slots = vec![Slot::Src; node.operands.len() - 1];
            slots.push(Slot::Dst);
            return Some((width, slots));
        }
    }
    None
}

/// Replace address operands in slots the target has no memory form for
/// with temporaries, inserting the load before (for sources) and the
/// store after (for destinations).
pub fn lower_misplaced_addresses(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let Some((width, slots)) = misplaced_address_shape(node) else {
            new_list.push(node.clone());
            continue;
        };
        if !node.operands.iter().any(|op| op.is_memory()) {
            new_list.push(node.clone());
            continue;
        }
        let (load_op, store_op) = transfer_ops(width);
        let class = if width == 'd' { TmpClass::Fpr } else { TmpClass::Gpr };
        let mut post = Vec::new();
        let mut operands = node.operands.clone();
        for (slot, kind) in operands.iter_mut().zip(slots) {
            if !slot.is_memory() {
                continue;
            }
            let tmp = tmps.fresh(class);
            if matches!(kind, Slot::Src | Slot::SrcDst) {
                new_list.push(Instruction::new(
                    load_op,
                    vec![slot.clone(), Operand::Tmp(tmp)],
                    node.origin.clone(),
                ));
            }
            if matches!(kind, Slot::Dst | Slot::SrcDst) {
                post.push(Instruction::new(
                    store_op,
                    vec![Operand::Tmp(tmp), slot.clone()],
                    node.origin.clone(),
                ));
            }
            *slot = Operand::Tmp(tmp);
        }
        new_list.push(node.replacing_operands(operands));
        new_list.append(&mut post);
    }
    new_list
}

/// Lower `bt*` test-and-branch pseudo-ops to an AND (for masked forms)
/// plus a compare-branch against zero. Pointer-width tests AND and branch
/// at quad width: testing bits of a capability's value field never needs
/// capability preservation.
pub fn lower_test(list: &[Instruction], tmps: &mut TmpFactory) -> Vec<Instruction> {
    enum TestCond {
        Zero,
        NonZero,
        Sign,
    }
    use Opcode::*;

    let mut new_list = Vec::with_capacity(list.len());
    for node in list {
        let test = match node.opcode {
            Btiz => Some(('i', TestCond::Zero)),
            Btinz => Some(('i', TestCond::NonZero)),
            Btis => Some(('i', TestCond::Sign)),
            Btbz => Some(('b', TestCond::Zero)),
            Btbnz => Some(('b', TestCond::NonZero)),
            Btbs => Some(('b', TestCond::Sign)),
            Btpz => Some(('p', TestCond::Zero)),
            Btpnz => Some(('p', TestCond::NonZero)),
            Btps => Some(('p', TestCond::Sign)),
            Btqz => Some(('q', TestCond::Zero)),
            Btqnz => Some(('q', TestCond::NonZero)),
            Btqs => Some(('q', TestCond::Sign)),
            _ => None,
        };
        let Some((width, cond)) = test else {
            new_list.push(node.clone());
            continue;
        };
        let branch = match (width, cond) {
            ('i', TestCond::Zero) => Bieq,
            ('i', TestCond::NonZero) => Bineq,
            ('i', TestCond::Sign) => Bilt,
            ('b', TestCond::Zero) => Bbeq,
            ('b', TestCond::NonZero) => Bbneq,
            ('b', TestCond::Sign) => Bblt,
            (_, TestCond::Zero) => Bqeq,
            (_, TestCond::NonZero) => Bqneq,
            (_, TestCond::Sign) => Bqlt,
        };
        match node.operands.as_slice() {
            [value, label] => {
                new_list.push(Instruction::new(
                    branch,
                    vec![value.clone(), Operand::Imm(0), label.clone()],
                    node.origin.clone(),
                ));
            }
            // An all-ones mask tests the value itself; skipping the AND
            // matters because this runs after immediate legalization.
            [value, mask, label] if mask.imm_value() == Some(-1) => {
                new_list.push(Instruction::new(
                    branch,
                    vec![value.clone(), Operand::Imm(0), label.clone()],
                    node.origin.clone(),
                ));
            }
            [value, mask, label] => {
                let and_op = if matches!(width, 'i' | 'b') { Andi } else { Andq };
                let tmp = tmps.fresh(TmpClass::Gpr);
                new_list.push(Instruction::new(
                    and_op,
                    vec![value.clone(), mask.clone(), Operand::Tmp(tmp)],
                    node.origin.clone(),
                ));
                new_list.push(Instruction::new(
                    branch,
                    vec![Operand::Tmp(tmp), Operand::Imm(0), label.clone()],
                    node.origin.clone(),
                ));
            }
            _ => new_list.push(node.clone()),
        }
    }
    new_list
}
