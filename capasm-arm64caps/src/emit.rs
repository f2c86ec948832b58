//! Per-opcode instruction selection and text emission
//!
//! The selector consumes fully legalized IR: no temporaries, no absolute
//! addresses, every offset inside its encodable window. It only emits
//! text and performs terminal validation; it never rewrites the list.
//!
//! The target's mnemonics are destination-first while the IR is
//! source-source-destination, so nearly every arm goes through the
//! flipped/TAC helpers. Two-operand IR forms render the single
//! source-destination register twice, as accumulator and destination.

use capasm_common::{BackendError, Options};
use capasm_ir::{Instruction, Opcode, Operand};
use log::trace;

use crate::operand::{label_text, lea_lines, operand_text};
use crate::passes::legalize;
use crate::registers::WidthClass::{self, Double, Ptr, Quad, Word};

/// Owns the output lines, the unique-label counter, the deferred-directive
/// queue, and the resolved configuration for one translation unit.
pub struct EmissionContext {
    options: Options,
    lines: Vec<String>,
    deferred: Vec<String>,
    next_uid: u32,
}

impl EmissionContext {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            lines: Vec::new(),
            deferred: Vec::new(),
            next_uid: 0,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Emit one instruction or label line.
    fn puts(&mut self, line: impl Into<String>) {
        self.lines.push(format!("    {}", line.into()));
    }

    /// Emit one raw (column-zero) line, used for preprocessor blocks.
    fn put_str(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn new_uid(&mut self) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Queue a raw line to be appended after the rest of the unit.
    fn defer(&mut self, line: impl Into<String>) {
        self.deferred.push(line.into());
    }

    /// Flush the deferred queue and return the unit's text.
    pub fn finish(mut self) -> String {
        let deferred = std::mem::take(&mut self.deferred);
        self.lines.extend(deferred);
        if self.lines.is_empty() {
            return String::new();
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

fn texts(
    node: &Instruction,
    operands: &[&Operand],
    widths: &[WidthClass],
) -> Result<String, BackendError> {
    let rendered = operands
        .iter()
        .zip(widths)
        .map(|(operand, width)| operand_text(node, operand, *width))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rendered.join(", "))
}

/// Destination-first rotation of an operand list and its widths.
fn flipped(
    node: &Instruction,
    operands: &[Operand],
    widths: &[WidthClass],
) -> Result<String, BackendError> {
    let last = operands.len() - 1;
    let mut ordered: Vec<&Operand> = vec![&operands[last]];
    ordered.extend(operands[..last].iter());
    let mut ordered_widths = vec![widths[widths.len() - 1]];
    ordered_widths.extend_from_slice(&widths[..widths.len() - 1]);
    texts(node, &ordered, &ordered_widths)
}

/// TAC rendering: three operands flip to destination-first; two operands
/// duplicate the source-destination as the accumulator slot.
fn tac(
    node: &Instruction,
    operands: &[Operand],
    widths: &[WidthClass],
) -> Result<String, BackendError> {
    if operands.len() == 3 {
        return flipped(node, operands, widths);
    }
    Ok(format!(
        "{}, {}",
        operand_text(node, &operands[1], widths[1])?,
        flipped(node, operands, widths)?
    ))
}

fn uniform(width: WidthClass, count: usize) -> Vec<WidthClass> {
    vec![width; count]
}

fn zero_reg(node: &Instruction, width: WidthClass) -> Result<&'static str, BackendError> {
    width
        .zero_register()
        .ok_or_else(|| BackendError::BadRegisterName {
            name: "zr".to_string(),
            location: node.origin.clone(),
        })
}

fn unsupported(node: &Instruction) -> BackendError {
    BackendError::UnsupportedOpcodeForTarget {
        opcode: node.opcode.mnemonic().to_string(),
        location: node.origin.clone(),
    }
}

fn not_lowered(node: &Instruction) -> BackendError {
    BackendError::UnresolvedOperand {
        detail: format!("{} must be lowered before selection", node.opcode),
        location: node.origin.clone(),
    }
}

fn emit_tac(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    widths: &[WidthClass],
) -> Result<(), BackendError> {
    ctx.puts(format!(
        "{} {}",
        mnemonic,
        tac(node, &node.operands, widths)?
    ));
    Ok(())
}

fn emit_flipped(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    widths: &[WidthClass],
) -> Result<(), BackendError> {
    ctx.puts(format!(
        "{} {}",
        mnemonic,
        flipped(node, &node.operands, widths)?
    ));
    Ok(())
}

/// Addition, with the immediate-zero collapse and the capability width
/// mixing: a capability accumulator takes a plain 64-bit displacement, so
/// the per-slot widths depend on the operand shape.
fn emit_add(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    width: WidthClass,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    let flag_setting = mnemonic.ends_with('s');
    if ops.len() == 3 {
        if let Some(value) = ops[0].imm_value() {
            if value == 0 && !flag_setting {
                if ops[1] != ops[2] {
                    let pair = [ops[1].clone(), ops[2].clone()];
                    ctx.puts(format!("mov {}", flipped(node, &pair, &uniform(width, 2))?));
                }
                return Ok(());
            }
            let widths = if width == Ptr {
                vec![Ptr, Ptr, Quad]
            } else {
                uniform(width, 3)
            };
            let text = texts(node, &[&ops[2], &ops[1], &ops[0]], &widths)?;
            ctx.puts(format!("{} {}", mnemonic, text));
            return Ok(());
        }
        let widths = if width == Ptr {
            vec![Ptr, Quad, Ptr]
        } else {
            uniform(width, 3)
        };
        return emit_flipped(ctx, node, mnemonic, &widths);
    }
    if ops[0].imm_value() == Some(0) && !flag_setting {
        return Ok(());
    }
    let widths = if width == Ptr {
        vec![Quad, Ptr]
    } else {
        uniform(width, 2)
    };
    emit_tac(ctx, node, mnemonic, &widths)
}

/// Subtraction. At capability width the subtrahend must already be an
/// immediate; a register subtrahend surviving to here is a pipeline bug.
fn emit_sub(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    width: WidthClass,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    let flag_setting = mnemonic.ends_with('s');
    let widths = if width == Ptr {
        let subtrahend = if ops.len() == 3 { &ops[1] } else { &ops[0] };
        if !subtrahend.is_immediate() {
            return Err(BackendError::UnresolvedOperand {
                detail: "capability subtraction with register subtrahend reached the selector"
                    .to_string(),
                location: node.origin.clone(),
            });
        }
        if ops.len() == 3 {
            vec![Ptr, Quad, Ptr]
        } else {
            vec![Quad, Ptr]
        }
    } else {
        uniform(width, ops.len())
    };
    if ops.len() == 3 && ops[1].imm_value() == Some(0) && !flag_setting {
        if ops[0] != ops[2] {
            let pair = [ops[0].clone(), ops[2].clone()];
            let pair_widths = [widths[0], widths[2]];
            ctx.puts(format!("mov {}", flipped(node, &pair, &pair_widths)?));
        }
        return Ok(());
    }
    if ops.len() == 2 && ops[0].imm_value() == Some(0) && !flag_setting {
        return Ok(());
    }
    emit_tac(ctx, node, mnemonic, &widths)
}

/// Shifts: immediate counts use the bitfield-move form with
/// opcode-specific magic immediates, register counts use the variable
/// shift mnemonic.
fn emit_shift(
    ctx: &mut EmissionContext,
    node: &Instruction,
    register_mnemonic: &str,
    immediate_mnemonic: &str,
    width: WidthClass,
    magic: impl Fn(i64) -> (i64, i64),
) -> Result<(), BackendError> {
    let ops = &node.operands;
    if ops.len() == 3 {
        if let Some(value) = ops[1].imm_value() {
            let (immr, imms) = magic(value);
            ctx.puts(format!(
                "{} {}, {}, #{}, #{}",
                immediate_mnemonic,
                operand_text(node, &ops[2], width)?,
                operand_text(node, &ops[0], width)?,
                immr,
                imms
            ));
            return Ok(());
        }
    }
    if ops.len() == 2 {
        if let Some(value) = ops[0].imm_value() {
            let (immr, imms) = magic(value);
            let target = operand_text(node, &ops[1], width)?;
            ctx.puts(format!(
                "{} {}, {}, #{}, #{}",
                immediate_mnemonic, target, target, immr, imms
            ));
            return Ok(());
        }
    }
    emit_tac(ctx, node, register_mnemonic, &uniform(width, ops.len()))
}

fn emit_lshift(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
) -> Result<(), BackendError> {
    emit_shift(ctx, node, "lslv", "ubfm", width, |value| {
        if width == Word {
            (32 - value, 31 - value)
        } else {
            (64 - value, 63 - value)
        }
    })
}

/// Multiply: a power-of-two constant becomes a left shift, everything
/// else uses the multiply-add-with-zero idiom to fit the three-operand
/// target mnemonic.
fn emit_mul(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    if ops.len() == 2 {
        if let Some(value) = ops[0].imm_value() {
            if value > 0 && value & (value - 1) == 0 {
                let shift = node.replacing_operands(vec![
                    Operand::Imm(value.trailing_zeros() as i64),
                    ops[1].clone(),
                ]);
                return emit_lshift(ctx, &shift, width);
            }
        }
    }
    ctx.puts(format!(
        "madd {}, {}",
        tac(node, ops, &uniform(width, ops.len()))?,
        zero_reg(node, width)?
    ));
    Ok(())
}

/// Loads: negative base-plus-offset displacements take the unscaled
/// (`ldur`-family) encoding.
fn emit_access(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    negative_offset_mnemonic: &str,
    width: WidthClass,
) -> Result<(), BackendError> {
    let register = operand_text(node, &node.operands[1], width)?;
    let memory = operand_text(node, &node.operands[0], width)?;
    let mnemonic = match &node.operands[0] {
        Operand::Address(addr) if addr.offset < 0 => negative_offset_mnemonic,
        _ => mnemonic,
    };
    ctx.puts(format!("{} {}, {}", mnemonic, register, memory));
    Ok(())
}

fn emit_store(
    ctx: &mut EmissionContext,
    node: &Instruction,
    mnemonic: &str,
    width: WidthClass,
) -> Result<(), BackendError> {
    ctx.puts(format!(
        "{} {}, {}",
        mnemonic,
        operand_text(node, &node.operands[0], width)?,
        operand_text(node, &node.operands[1], width)?
    ));
    Ok(())
}

/// Comparison branch: flag-setting subtract against the width's zero
/// register, then a condition-code branch.
fn emit_branch(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
    condition: &str,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    let sources: Vec<&Operand> = ops[..ops.len() - 1].iter().collect();
    ctx.puts(format!(
        "subs {}, {}",
        zero_reg(node, width)?,
        texts(node, &sources, &uniform(width, sources.len()))?
    ));
    ctx.puts(format!(
        "b.{} {}",
        condition,
        label_text(node, &ops[ops.len() - 1])?
    ));
    Ok(())
}

/// Equality and inequality branches against a literal zero use the
/// dedicated compare-and-branch form on the non-zero operand.
fn emit_equality_branch(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
    condition: &str,
    zero_form: &str,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    let tested = if ops[0].imm_value() == Some(0) {
        Some(&ops[1])
    } else if ops[1].imm_value() == Some(0) {
        Some(&ops[0])
    } else {
        None
    };
    if let Some(tested) = tested {
        ctx.puts(format!(
            "{} {}, {}",
            zero_form,
            operand_text(node, tested, width)?,
            label_text(node, &ops[2])?
        ));
        return Ok(());
    }
    emit_branch(ctx, node, width, condition)
}

/// Boolean comparison: the same flag-setting subtract, then the
/// conditional-increment idiom. The condition is inverted relative to the
/// branch table because `csinc` produces 1 when the condition does NOT
/// hold for its selected source.
fn emit_compare(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
    inverted_condition: &str,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    let sources: Vec<&Operand> = ops[..ops.len() - 1].iter().collect();
    ctx.puts(format!(
        "subs {}, {}",
        zero_reg(node, width)?,
        texts(node, &sources, &uniform(width, sources.len()))?
    ));
    ctx.puts(format!(
        "csinc {}, wzr, wzr, {}",
        operand_text(node, &ops[ops.len() - 1], Word)?,
        inverted_condition
    ));
    Ok(())
}

fn emit_float_branch(
    ctx: &mut EmissionContext,
    node: &Instruction,
    condition: &str,
) -> Result<(), BackendError> {
    let ops = &node.operands;
    ctx.puts(format!(
        "fcmp {}, {}",
        operand_text(node, &ops[0], Double)?,
        operand_text(node, &ops[1], Double)?
    ));
    ctx.puts(format!("b.{} {}", condition, label_text(node, &ops[2])?));
    Ok(())
}

/// Up to four 16-bit chunks, most significant first. The first emitted
/// chunk zero-fills (or one-fills via `movn` for negative values), later
/// chunks keep the rest of the register. All-skip values still emit the
/// final chunk.
fn emit_move_immediate(
    ctx: &mut EmissionContext,
    node: &Instruction,
    value: i64,
    target: &Operand,
) -> Result<(), BackendError> {
    let negative = value < 0;
    let skip_chunk: i64 = if negative { 0xffff } else { 0 };
    let target_text = operand_text(node, target, Quad)?;
    let mut first = true;
    for shift in [48, 32, 16, 0] {
        let chunk = (value >> shift) & 0xffff;
        if chunk == skip_chunk && (shift != 0 || !first) {
            continue;
        }
        if first {
            if negative {
                ctx.puts(format!(
                    "movn {}, #{}, lsl #{}",
                    target_text,
                    !chunk & 0xffff,
                    shift
                ));
            } else {
                ctx.puts(format!("movz {}, #{}, lsl #{}", target_text, chunk, shift));
            }
            first = false;
        } else {
            ctx.puts(format!("movk {}, #{}, lsl #{}", target_text, chunk, shift));
        }
    }
    Ok(())
}

fn emit_move(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
) -> Result<(), BackendError> {
    if let Some(value) = node.operands[0].imm_value() {
        return emit_move_immediate(ctx, node, value, &node.operands[1]);
    }
    emit_flipped(ctx, node, "mov", &uniform(width, 2))
}

/// Paired push/pop. Pop pairs come in the reverse operand order of push
/// pairs, so single-slot platforms and this one agree on stack layout.
/// Capability pairs take a 32-byte step, plain 64-bit pairs 16 bytes.
fn emit_push_pop(
    ctx: &mut EmissionContext,
    node: &Instruction,
    width: WidthClass,
    pop: bool,
) -> Result<(), BackendError> {
    if node.operands.len() % 2 != 0 {
        return Err(BackendError::UnresolvedOperand {
            detail: "push/pop operands must come in pairs".to_string(),
            location: node.origin.clone(),
        });
    }
    let step = if width == Ptr { 32 } else { 16 };
    for pair in node.operands.chunks(2) {
        let first = operand_text(node, &pair[0], width)?;
        let second = operand_text(node, &pair[1], width)?;
        if pop {
            let sp = if width == Ptr { "csp" } else { "sp" };
            ctx.puts(format!("ldp {}, {}, [{}], #{}", second, first, sp, step));
        } else {
            ctx.puts(format!("stp {}, {}, [csp, #-{}]!", first, second, step));
        }
    }
    Ok(())
}

/// GOT-indirect global address materialization, with platform-conditional
/// text and a deferred linker-optimization-hint directive.
fn emit_globaladdr(
    ctx: &mut EmissionContext,
    node: &Instruction,
) -> Result<(), BackendError> {
    let label = label_text(node, &node.operands[0])?;
    let target = operand_text(node, &node.operands[1], Ptr)?;
    let uid = ctx.new_uid();

    ctx.put_str("#if OS(DARWIN)");
    ctx.puts(format!("L_offlineasm_loh_adrp_{}:", uid));
    ctx.puts(format!("adrp {}, {}@GOTPAGE", target, label));
    ctx.puts(format!("L_offlineasm_loh_ldr_{}:", uid));
    ctx.puts(format!("ldr {}, [{}, {}@GOTPAGEOFF]", target, target, label));
    ctx.put_str("#elif OS(LINUX) || OS(FREEBSD)");
    ctx.puts(format!("adrp {}, :got:{}", target, label));
    ctx.puts(format!("ldr {}, [{}, :got_lo12:{}]", target, target, label));
    ctx.put_str("#else");
    ctx.put_str("#error Missing globaladdr implementation");
    ctx.put_str("#endif");

    ctx.defer("#if OS(DARWIN)");
    ctx.defer(format!(
        "    .loh AdrpLdrGot L_offlineasm_loh_adrp_{}, L_offlineasm_loh_ldr_{}",
        uid, uid
    ));
    ctx.defer("#endif");
    Ok(())
}

/// Capability reconstruction: re-derive a valid capability from a base
/// capability and a 64-bit value.
fn emit_cvtz(ctx: &mut EmissionContext, node: &Instruction) -> Result<(), BackendError> {
    let ops = &node.operands;
    let (src1, src2, dst) = if ops.len() == 3 {
        (&ops[0], &ops[1], &ops[2])
    } else {
        (&ops[0], &ops[1], &ops[1])
    };
    let operands = [src1.clone(), src2.clone(), dst.clone()];
    ctx.puts(format!(
        "cvtz {}",
        tac(node, &operands, &[Ptr, Quad, Ptr])?
    ));
    Ok(())
}

fn symbol_text(node: &Instruction, operand: &Operand) -> Result<String, BackendError> {
    match operand {
        Operand::Imm(value) => Ok(value.to_string()),
        _ => label_text(node, operand),
    }
}

fn immediate_value(node: &Instruction, operand: &Operand) -> Result<i64, BackendError> {
    operand
        .imm_value()
        .ok_or_else(|| BackendError::UnresolvedOperand {
            detail: format!("{} where an immediate was expected", operand),
            location: node.origin.clone(),
        })
}

/// Emit the assembly for one legalized instruction.
pub fn select(ctx: &mut EmissionContext, node: &Instruction) -> Result<(), BackendError> {
    use Opcode::*;
    trace!("select {}", node);
    let ops = &node.operands;
    match node.opcode {
        Cvtz => emit_cvtz(ctx, node),
        Addi => emit_add(ctx, node, "add", Word),
        Addis => emit_add(ctx, node, "adds", Word),
        Addp => emit_add(ctx, node, "add", Ptr),
        Addps => emit_add(ctx, node, "adds", Ptr),
        Addq => emit_add(ctx, node, "add", Quad),
        Addqs => emit_add(ctx, node, "adds", Quad),
        Andi => emit_tac(ctx, node, "and", &uniform(Word, ops.len())),
        Andq => emit_tac(ctx, node, "and", &uniform(Quad, ops.len())),
        Ori => emit_tac(ctx, node, "orr", &uniform(Word, ops.len())),
        Orq => emit_tac(ctx, node, "orr", &uniform(Quad, ops.len())),
        Xori => emit_tac(ctx, node, "eor", &uniform(Word, ops.len())),
        Xorq => emit_tac(ctx, node, "eor", &uniform(Quad, ops.len())),
        Orp | Xorp | Lshiftp | Urshiftp | Mulp | Btd2i | Bcd2i | Movdz => Err(unsupported(node)),
        Lshifti => emit_lshift(ctx, node, Word),
        Lshiftq => emit_lshift(ctx, node, Quad),
        Rshifti => emit_shift(ctx, node, "asrv", "sbfm", Word, |value| (value, 31)),
        // Shifting a capability is meaningless, but architecture-agnostic
        // callers expect the 64-bit integer-view behavior.
        Rshiftp | Rshiftq => emit_shift(ctx, node, "asrv", "sbfm", Quad, |value| (value, 63)),
        Urshifti => emit_shift(ctx, node, "lsrv", "ubfm", Word, |value| (value, 31)),
        Urshiftq => emit_shift(ctx, node, "lsrv", "ubfm", Quad, |value| (value, 63)),
        Muli => emit_mul(ctx, node, Word),
        Mulq => emit_mul(ctx, node, Quad),
        Subi => emit_sub(ctx, node, "sub", Word),
        Subis => emit_sub(ctx, node, "subs", Word),
        Subp => emit_sub(ctx, node, "sub", Ptr),
        Subq => emit_sub(ctx, node, "sub", Quad),
        Subqs => emit_sub(ctx, node, "subs", Quad),
        Negi => {
            let target = operand_text(node, &ops[0], Word)?;
            ctx.puts(format!("sub {}, wzr, {}", target, target));
            Ok(())
        }
        Negp => {
            let target = operand_text(node, &ops[0], Ptr)?;
            ctx.puts(format!("sub {}, czr, {}", target, target));
            Ok(())
        }
        Negq => {
            let target = operand_text(node, &ops[0], Quad)?;
            ctx.puts(format!("sub {}, xzr, {}", target, target));
            Ok(())
        }
        Loadi => emit_access(ctx, node, "ldr", "ldur", Word),
        Loadis => emit_access(ctx, node, "ldrsw", "ldursw", Quad),
        Loadp => emit_access(ctx, node, "ldr", "ldur", Ptr),
        Loadq => emit_access(ctx, node, "ldr", "ldur", Quad),
        Loadv | Loadvmc => {
            let width = if ctx.options.heap_offset_refs { Quad } else { Ptr };
            emit_access(ctx, node, "ldr", "ldur", width)
        }
        Loadb => emit_access(ctx, node, "ldrb", "ldurb", Word),
        Loadbsi => emit_access(ctx, node, "ldrsb", "ldursb", Word),
        Loadbsq => emit_access(ctx, node, "ldrsb", "ldursb", Quad),
        Loadh => emit_access(ctx, node, "ldrh", "ldurh", Word),
        Loadhsi => emit_access(ctx, node, "ldrsh", "ldursh", Word),
        Loadhsq => emit_access(ctx, node, "ldrsh", "ldursh", Quad),
        Loadd => emit_access(ctx, node, "ldr", "ldur", Double),
        Storei => emit_store(ctx, node, "str", Word),
        Storep => emit_store(ctx, node, "str", Ptr),
        Storeq => emit_store(ctx, node, "str", Quad),
        Storev => {
            let width = if ctx.options.heap_offset_refs { Quad } else { Ptr };
            emit_store(ctx, node, "str", width)
        }
        Storeb => emit_store(ctx, node, "strb", Word),
        Storeh => emit_store(ctx, node, "strh", Word),
        Stored => emit_store(ctx, node, "str", Double),
        Addd => emit_tac(ctx, node, "fadd", &uniform(Double, ops.len())),
        Subd => emit_tac(ctx, node, "fsub", &uniform(Double, ops.len())),
        Muld => emit_tac(ctx, node, "fmul", &uniform(Double, ops.len())),
        Divd => emit_tac(ctx, node, "fdiv", &uniform(Double, ops.len())),
        Sqrtd => emit_flipped(ctx, node, "fsqrt", &uniform(Double, 2)),
        Ci2d => emit_flipped(ctx, node, "scvtf", &[Word, Double]),
        Td2i => emit_flipped(ctx, node, "fcvtzs", &[Double, Word]),
        Bdeq => emit_float_branch(ctx, node, "eq"),
        Bdneq => {
            ctx.puts(format!(
                "fcmp {}, {}",
                operand_text(node, &ops[0], Double)?,
                operand_text(node, &ops[1], Double)?
            ));
            // NaN operands set the overflow flag; route them past the
            // not-equal branch.
            let skip = format!(".Lofflineasm_unordered_{}", ctx.new_uid());
            ctx.puts(format!("b.vs {}", skip));
            ctx.puts(format!("b.ne {}", label_text(node, &ops[2])?));
            ctx.puts(format!("{}:", skip));
            Ok(())
        }
        Bdgt => emit_float_branch(ctx, node, "gt"),
        Bdgteq => emit_float_branch(ctx, node, "ge"),
        Bdlt => emit_float_branch(ctx, node, "mi"),
        Bdlteq => emit_float_branch(ctx, node, "ls"),
        Bdequn => {
            ctx.puts(format!(
                "fcmp {}, {}",
                operand_text(node, &ops[0], Double)?,
                operand_text(node, &ops[1], Double)?
            ));
            let target = label_text(node, &ops[2])?;
            ctx.puts(format!("b.vs {}", target));
            ctx.puts(format!("b.eq {}", target));
            Ok(())
        }
        Bdnequn => emit_float_branch(ctx, node, "ne"),
        Bdgtun => emit_float_branch(ctx, node, "hi"),
        Bdgtequn => emit_float_branch(ctx, node, "pl"),
        Bdltun => emit_float_branch(ctx, node, "lt"),
        Bdltequn => emit_float_branch(ctx, node, "le"),
        Popq => emit_push_pop(ctx, node, Quad, true),
        Popp => emit_push_pop(ctx, node, Ptr, true),
        Pushq => emit_push_pop(ctx, node, Quad, false),
        Pushp => emit_push_pop(ctx, node, Ptr, false),
        Move => emit_move(ctx, node, Quad),
        Movep => emit_move(ctx, node, Ptr),
        Moved => emit_flipped(ctx, node, "fmov", &uniform(Double, 2)),
        Sxi2p => emit_flipped(ctx, node, "sxtw", &[Word, Ptr]),
        Sxi2q => emit_flipped(ctx, node, "sxtw", &[Word, Quad]),
        Zxi2p => emit_flipped(ctx, node, "uxtw", &[Word, Ptr]),
        Zxi2q => emit_flipped(ctx, node, "uxtw", &[Word, Quad]),
        Nop => {
            ctx.puts("nop");
            Ok(())
        }
        Bieq | Bbeq => emit_equality_branch(ctx, node, Word, "eq", "cbz"),
        Bpeq => emit_equality_branch(ctx, node, Ptr, "eq", "cbz"),
        Bqeq => emit_equality_branch(ctx, node, Quad, "eq", "cbz"),
        Bineq | Bbneq => emit_equality_branch(ctx, node, Word, "ne", "cbnz"),
        Bpneq => emit_equality_branch(ctx, node, Ptr, "ne", "cbnz"),
        Bqneq => emit_equality_branch(ctx, node, Quad, "ne", "cbnz"),
        Bia | Bba => emit_branch(ctx, node, Word, "hi"),
        Bpa => emit_branch(ctx, node, Ptr, "hi"),
        Bqa => emit_branch(ctx, node, Quad, "hi"),
        Biaeq | Bbaeq => emit_branch(ctx, node, Word, "hs"),
        Bpaeq => emit_branch(ctx, node, Ptr, "hs"),
        Bqaeq => emit_branch(ctx, node, Quad, "hs"),
        Bib | Bbb => emit_branch(ctx, node, Word, "lo"),
        Bpb => emit_branch(ctx, node, Ptr, "lo"),
        Bqb => emit_branch(ctx, node, Quad, "lo"),
        Bibeq | Bbbeq => emit_branch(ctx, node, Word, "ls"),
        Bpbeq => emit_branch(ctx, node, Ptr, "ls"),
        Bqbeq => emit_branch(ctx, node, Quad, "ls"),
        Bigt | Bbgt => emit_branch(ctx, node, Word, "gt"),
        Bpgt => emit_branch(ctx, node, Ptr, "gt"),
        Bqgt => emit_branch(ctx, node, Quad, "gt"),
        Bigteq | Bbgteq => emit_branch(ctx, node, Word, "ge"),
        Bpgteq => emit_branch(ctx, node, Ptr, "ge"),
        Bqgteq => emit_branch(ctx, node, Quad, "ge"),
        Bilt | Bblt => emit_branch(ctx, node, Word, "lt"),
        Bplt => emit_branch(ctx, node, Ptr, "lt"),
        Bqlt => emit_branch(ctx, node, Quad, "lt"),
        Bilteq | Bblteq => emit_branch(ctx, node, Word, "le"),
        Bplteq => emit_branch(ctx, node, Ptr, "le"),
        Bqlteq => emit_branch(ctx, node, Quad, "le"),
        Jmp => {
            if ops[0].is_label() {
                ctx.puts(format!("b {}", label_text(node, &ops[0])?));
            } else {
                ctx.puts(format!("br {}", operand_text(node, &ops[0], Ptr)?));
            }
            Ok(())
        }
        Call => {
            if ops[0].is_label() {
                ctx.puts(format!("bl {}", label_text(node, &ops[0])?));
            } else {
                ctx.puts(format!("blr {}", operand_text(node, &ops[0], Ptr)?));
            }
            Ok(())
        }
        Break => {
            ctx.puts("brk #0");
            Ok(())
        }
        Ret => {
            ctx.puts("ret");
            Ok(())
        }
        Cieq | Cbeq => emit_compare(ctx, node, Word, "ne"),
        Cpeq => emit_compare(ctx, node, Ptr, "ne"),
        Cqeq => emit_compare(ctx, node, Quad, "ne"),
        Cineq | Cbneq => emit_compare(ctx, node, Word, "eq"),
        Cpneq => emit_compare(ctx, node, Ptr, "eq"),
        Cqneq => emit_compare(ctx, node, Quad, "eq"),
        Cia | Cba => emit_compare(ctx, node, Word, "ls"),
        Cpa => emit_compare(ctx, node, Ptr, "ls"),
        Cqa => emit_compare(ctx, node, Quad, "ls"),
        Ciaeq | Cbaeq => emit_compare(ctx, node, Word, "lo"),
        Cpaeq => emit_compare(ctx, node, Ptr, "lo"),
        Cqaeq => emit_compare(ctx, node, Quad, "lo"),
        Cib | Cbb => emit_compare(ctx, node, Word, "hs"),
        Cpb => emit_compare(ctx, node, Ptr, "hs"),
        Cqb => emit_compare(ctx, node, Quad, "hs"),
        Cibeq | Cbbeq => emit_compare(ctx, node, Word, "hi"),
        Cpbeq => emit_compare(ctx, node, Ptr, "hi"),
        Cqbeq => emit_compare(ctx, node, Quad, "hi"),
        Cilt | Cblt => emit_compare(ctx, node, Word, "ge"),
        Cplt => emit_compare(ctx, node, Ptr, "ge"),
        Cqlt => emit_compare(ctx, node, Quad, "ge"),
        Cilteq | Cblteq => emit_compare(ctx, node, Word, "gt"),
        Cplteq => emit_compare(ctx, node, Ptr, "gt"),
        Cqlteq => emit_compare(ctx, node, Quad, "gt"),
        Cigt | Cbgt => emit_compare(ctx, node, Word, "le"),
        Cpgt => emit_compare(ctx, node, Ptr, "le"),
        Cqgt => emit_compare(ctx, node, Quad, "le"),
        Cigteq | Cbgteq => emit_compare(ctx, node, Word, "lt"),
        Cpgteq => emit_compare(ctx, node, Ptr, "lt"),
        Cqgteq => emit_compare(ctx, node, Quad, "lt"),
        Peek => {
            let slot = immediate_value(node, &ops[0])?;
            ctx.puts(format!(
                "ldr {}, [sp, #{}]",
                operand_text(node, &ops[1], Quad)?,
                slot * 8
            ));
            Ok(())
        }
        Poke => {
            let slot = immediate_value(node, &ops[0])?;
            ctx.puts(format!(
                "str {}, [sp, #{}]",
                operand_text(node, &ops[1], Quad)?,
                slot * 8
            ));
            Ok(())
        }
        Fp2d => emit_flipped(ctx, node, "fmov", &[Ptr, Double]),
        Fq2d => emit_flipped(ctx, node, "fmov", &[Quad, Double]),
        Fd2p => emit_flipped(ctx, node, "fmov", &[Double, Ptr]),
        Fd2q => emit_flipped(ctx, node, "fmov", &[Double, Quad]),
        Bo => {
            ctx.puts(format!("b.vs {}", label_text(node, &ops[0])?));
            Ok(())
        }
        Bs => {
            ctx.puts(format!("b.mi {}", label_text(node, &ops[0])?));
            Ok(())
        }
        Bz => {
            ctx.puts(format!("b.eq {}", label_text(node, &ops[0])?));
            Ok(())
        }
        Bnz => {
            ctx.puts(format!("b.ne {}", label_text(node, &ops[0])?));
            Ok(())
        }
        Leai => {
            for line in lea_lines(node, &ops[0], &ops[1], Word)? {
                ctx.puts(line);
            }
            Ok(())
        }
        Leap => {
            for line in lea_lines(node, &ops[0], &ops[1], Ptr)? {
                ctx.puts(line);
            }
            Ok(())
        }
        Leaq => {
            for line in lea_lines(node, &ops[0], &ops[1], Quad)? {
                ctx.puts(line);
            }
            Ok(())
        }
        Smulli => {
            ctx.puts(format!(
                "smaddl {}, {}, {}, xzr",
                operand_text(node, &ops[2], Quad)?,
                operand_text(node, &ops[0], Word)?,
                operand_text(node, &ops[1], Word)?
            ));
            Ok(())
        }
        Memfence => {
            ctx.puts("dmb sy");
            Ok(())
        }
        Bfiq => {
            ctx.puts(format!(
                "bfi {}, {}, {}, {}",
                operand_text(node, &ops[3], Quad)?,
                operand_text(node, &ops[0], Quad)?,
                immediate_value(node, &ops[1])?,
                immediate_value(node, &ops[2])?
            ));
            Ok(())
        }
        Pcrtoaddr => {
            let symbol = symbol_text(node, &ops[0])?;
            let target = operand_text(node, &ops[1], Ptr)?;
            ctx.puts(format!("adrp {}, {}", target, symbol));
            ctx.puts(format!("add {}, {}, #:lo12:{}", target, target, symbol));
            Ok(())
        }
        Globaladdr => emit_globaladdr(ctx, node),
        Print | Printi | Printb | Printq | Printp | Printc => {
            ctx.put_str("/* print instructions not supported on this target */");
            Ok(())
        }
        Makecap => {
            ctx.put_str("/* makecap instruction is NOP */");
            Ok(())
        }
        _ => Err(not_lowered(node)),
    }
}

/// Run the selector over an already-legalized list and return the unit's
/// assembly text.
pub fn emit_unit(list: &[Instruction], options: Options) -> Result<String, BackendError> {
    let mut ctx = EmissionContext::new(options);
    for node in list {
        select(&mut ctx, node)?;
    }
    Ok(ctx.finish())
}

/// Legalize and select in one call: the whole backend for one unit.
pub fn assemble(list: &[Instruction], options: &Options) -> Result<String, BackendError> {
    let legalized = legalize(list, options)?;
    emit_unit(&legalized, *options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capasm_common::SourceLocation;
    use capasm_ir::{FprRole, GprRole};
    use pretty_assertions::assert_eq;

    fn insn(opcode: Opcode, operands: Vec<Operand>) -> Instruction {
        Instruction::new(opcode, operands, SourceLocation::dummy())
    }

    fn t(role: GprRole) -> Operand {
        Operand::Gpr(role)
    }

    fn d(role: FprRole) -> Operand {
        Operand::Fpr(role)
    }

    fn emit_one(node: Instruction) -> String {
        emit_unit(&[node], Options::default()).unwrap()
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().map(|line| line.trim_start()).collect()
    }

    #[test]
    fn test_add_three_operand_flips() {
        let out = emit_one(insn(
            Opcode::Addi,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["add w2, w0, w1"]);
    }

    #[test]
    fn test_add_two_operand_duplicates_accumulator() {
        let out = emit_one(insn(Opcode::Addq, vec![t(GprRole::T0), t(GprRole::T1)]));
        assert_eq!(lines(&out), vec!["add x1, x1, x0"]);
    }

    #[test]
    fn test_capability_add_mixes_widths() {
        let out = emit_one(insn(
            Opcode::Addp,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["add c2, c0, x1"]);
        let out = emit_one(insn(
            Opcode::Addp,
            vec![Operand::Imm(16), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["add c2, c1, #16"]);
    }

    #[test]
    fn test_add_immediate_zero_collapses() {
        let out = emit_one(insn(
            Opcode::Addi,
            vec![Operand::Imm(0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["mov w2, w1"]);
        let same = emit_one(insn(Opcode::Addi, vec![Operand::Imm(0), t(GprRole::T1)]));
        assert_eq!(same, "");
        // Flag-setting forms never collapse.
        let flags = emit_one(insn(Opcode::Addis, vec![Operand::Imm(0), t(GprRole::T1)]));
        assert_eq!(lines(&flags), vec!["adds w1, w1, #0"]);
    }

    #[test]
    fn test_sub_immediate_zero_collapses() {
        let out = emit_one(insn(
            Opcode::Subq,
            vec![t(GprRole::T0), Operand::Imm(0), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["mov x2, x0"]);
    }

    #[test]
    fn test_capability_sub_takes_immediate_displacement() {
        let out = emit_one(insn(
            Opcode::Subp,
            vec![t(GprRole::T0), Operand::Imm(32), t(GprRole::T1)],
        ));
        assert_eq!(lines(&out), vec!["sub c1, c0, #32"]);
    }

    #[test]
    fn test_mul_power_of_two_becomes_shift() {
        let out = emit_one(insn(Opcode::Muli, vec![Operand::Imm(8), t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["ubfm w0, w0, #29, #28"]);
        let out = emit_one(insn(Opcode::Mulq, vec![t(GprRole::T0), t(GprRole::T1)]));
        assert_eq!(lines(&out), vec!["madd x1, x1, x0, xzr"]);
    }

    #[test]
    fn test_shift_immediate_uses_bitfield_move() {
        let out = emit_one(insn(
            Opcode::Lshifti,
            vec![t(GprRole::T0), Operand::Imm(3), t(GprRole::T1)],
        ));
        assert_eq!(lines(&out), vec!["ubfm w1, w0, #29, #28"]);
        let out = emit_one(insn(
            Opcode::Rshiftq,
            vec![t(GprRole::T0), Operand::Imm(4), t(GprRole::T1)],
        ));
        assert_eq!(lines(&out), vec!["sbfm x1, x0, #4, #63"]);
    }

    #[test]
    fn test_shift_register_count_uses_variable_form() {
        let out = emit_one(insn(
            Opcode::Urshiftq,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["lsrv x2, x0, x1"]);
    }

    #[test]
    fn test_load_negative_offset_uses_unscaled_form() {
        let out = emit_one(insn(
            Opcode::Loadq,
            vec![Operand::address(t(GprRole::T0), -16), t(GprRole::T1)],
        ));
        assert_eq!(lines(&out), vec!["ldur x1, [c0, #-16]"]);
        let out = emit_one(insn(
            Opcode::Loadq,
            vec![Operand::address(t(GprRole::T0), 16), t(GprRole::T1)],
        ));
        assert_eq!(lines(&out), vec!["ldr x1, [c0, #16]"]);
    }

    #[test]
    fn test_store_is_unflipped() {
        let out = emit_one(insn(
            Opcode::Storep,
            vec![t(GprRole::T1), Operand::address(t(GprRole::Cfr), 16)],
        ));
        assert_eq!(lines(&out), vec!["str c1, [c29, #16]"]);
    }

    #[test]
    fn test_vector_access_width_follows_options() {
        let node = insn(
            Opcode::Loadv,
            vec![Operand::address(t(GprRole::T0), 8), t(GprRole::T1)],
        );
        let narrow = emit_unit(
            &[node.clone()],
            Options {
                heap_offset_refs: true,
            },
        )
        .unwrap();
        assert_eq!(lines(&narrow), vec!["ldr x1, [c0, #8]"]);
        let wide = emit_unit(&[node], Options::default()).unwrap();
        assert_eq!(lines(&wide), vec!["ldr c1, [c0, #8]"]);
    }

    #[test]
    fn test_branch_equal_zero_uses_cbz() {
        let out = emit_one(insn(
            Opcode::Bqeq,
            vec![t(GprRole::T0), Operand::Imm(0), Operand::label("_done")],
        ));
        assert_eq!(lines(&out), vec!["cbz x0, _done"]);
        let out = emit_one(insn(
            Opcode::Bineq,
            vec![Operand::Imm(0), t(GprRole::T1), Operand::label("_next")],
        ));
        assert_eq!(lines(&out), vec!["cbnz w1, _next"]);
    }

    #[test]
    fn test_branch_general_form_uses_flag_setting_subtract() {
        let out = emit_one(insn(
            Opcode::Bpa,
            vec![t(GprRole::T0), t(GprRole::T1), Operand::label("_slow")],
        ));
        assert_eq!(lines(&out), vec!["subs czr, c0, c1", "b.hi _slow"]);
    }

    #[test]
    fn test_compare_inverts_condition() {
        let out = emit_one(insn(
            Opcode::Cqeq,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(
            lines(&out),
            vec!["subs xzr, x0, x1", "csinc w2, wzr, wzr, ne"]
        );
    }

    #[test]
    fn test_move_small_immediate() {
        let out = emit_one(insn(Opcode::Move, vec![Operand::Imm(41), t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["movz x0, #41, lsl #0"]);
    }

    #[test]
    fn test_move_zero_still_emits_one_chunk() {
        let out = emit_one(insn(Opcode::Move, vec![Operand::Imm(0), t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["movz x0, #0, lsl #0"]);
    }

    #[test]
    fn test_move_negative_one_uses_movn() {
        let out = emit_one(insn(Opcode::Move, vec![Operand::Imm(-1), t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["movn x0, #0, lsl #0"]);
    }

    #[test]
    fn test_move_wide_immediate_chunks() {
        let out = emit_one(insn(
            Opcode::Move,
            vec![Operand::Imm(0x0001_0000_0002), t(GprRole::T0)],
        ));
        assert_eq!(
            lines(&out),
            vec!["movz x0, #1, lsl #32", "movk x0, #2, lsl #0"]
        );
    }

    #[test]
    fn test_moved_is_double_register_move() {
        let out = emit_one(insn(
            Opcode::Moved,
            vec![d(FprRole::Ft0), d(FprRole::Ft1)],
        ));
        assert_eq!(lines(&out), vec!["fmov d1, d0"]);
    }

    /// Replays an emitted movz/movn/movk sequence with the architectural
    /// semantics of each mnemonic.
    fn replay_move_sequence(text: &str) -> i64 {
        let mut value: i64 = 0;
        for line in lines(text) {
            let mut parts = line.split(&[' ', ','][..]).filter(|part| !part.is_empty());
            let mnemonic = parts.next().unwrap();
            let _target = parts.next().unwrap();
            let chunk: i64 = parts.next().unwrap().trim_start_matches('#').parse().unwrap();
            assert_eq!(parts.next(), Some("lsl"));
            let shift: u32 = parts.next().unwrap().trim_start_matches('#').parse().unwrap();
            value = match mnemonic {
                "movz" => chunk << shift,
                "movn" => !(chunk << shift),
                "movk" => (value & !(0xffff_i64 << shift)) | (chunk << shift),
                other => panic!("unexpected mnemonic {}", other),
            };
        }
        value
    }

    #[test]
    fn test_move_immediate_reconstructs_exact_values() {
        for value in [
            0,
            -1,
            42,
            -42,
            4096,
            -4096,
            0x0001_0000_0002,
            0x1234_5678_9abc_def0_u64 as i64,
            0x0000_ffff_0000_ffff,
            i64::MIN,
            i64::MAX,
        ] {
            let out = emit_one(insn(Opcode::Move, vec![Operand::Imm(value), t(GprRole::T0)]));
            assert_eq!(
                replay_move_sequence(&out),
                value,
                "sequence for {:#x} was:\n{}",
                value,
                out
            );
        }
    }

    #[test]
    fn test_register_move_at_width() {
        let out = emit_one(insn(Opcode::Movep, vec![t(GprRole::T0), t(GprRole::T1)]));
        assert_eq!(lines(&out), vec!["mov c1, c0"]);
        let out = emit_one(insn(Opcode::Move, vec![t(GprRole::T0), t(GprRole::T1)]));
        assert_eq!(lines(&out), vec!["mov x1, x0"]);
    }

    #[test]
    fn test_push_pop_pairing() {
        let regs = vec![
            t(GprRole::T0),
            t(GprRole::T1),
            t(GprRole::T2),
            t(GprRole::T3),
        ];
        let out = emit_one(insn(Opcode::Pushq, regs.clone()));
        assert_eq!(
            lines(&out),
            vec!["stp x0, x1, [csp, #-16]!", "stp x2, x3, [csp, #-16]!"]
        );
        let out = emit_one(insn(Opcode::Popq, regs));
        assert_eq!(lines(&out), vec!["ldp x1, x0, [sp], #16", "ldp x3, x2, [sp], #16"]);
    }

    #[test]
    fn test_capability_pairs_step_32_bytes() {
        let out = emit_one(insn(Opcode::Pushp, vec![t(GprRole::Cfr), t(GprRole::Lr)]));
        assert_eq!(lines(&out), vec!["stp c29, clr, [csp, #-32]!"]);
        let out = emit_one(insn(Opcode::Popp, vec![t(GprRole::Cfr), t(GprRole::Lr)]));
        assert_eq!(lines(&out), vec!["ldp clr, c29, [csp], #32"]);
    }

    #[test]
    fn test_odd_push_operands_fail() {
        let err = emit_unit(
            &[insn(Opcode::Pushq, vec![t(GprRole::T0)])],
            Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::UnresolvedOperand { .. }));
    }

    #[test]
    fn test_cvtz_renders_mixed_widths() {
        let out = emit_one(insn(
            Opcode::Cvtz,
            vec![t(GprRole::T0), t(GprRole::T1), t(GprRole::T2)],
        ));
        assert_eq!(lines(&out), vec!["cvtz c2, c0, x1"]);
    }

    #[test]
    fn test_float_branch_nan_handling() {
        let out = emit_one(insn(
            Opcode::Bdneq,
            vec![d(FprRole::Ft0), d(FprRole::Ft1), Operand::label("_taken")],
        ));
        assert_eq!(
            lines(&out),
            vec![
                "fcmp d0, d1",
                "b.vs .Lofflineasm_unordered_0",
                "b.ne _taken",
                ".Lofflineasm_unordered_0:"
            ]
        );
        let out = emit_one(insn(
            Opcode::Bdequn,
            vec![d(FprRole::Ft0), d(FprRole::Ft1), Operand::label("_taken")],
        ));
        assert_eq!(
            lines(&out),
            vec!["fcmp d0, d1", "b.vs _taken", "b.eq _taken"]
        );
    }

    #[test]
    fn test_globaladdr_emits_platform_blocks_and_defers_loh() {
        let out = emit_one(insn(
            Opcode::Globaladdr,
            vec![Operand::label("_g_config"), t(GprRole::T0)],
        ));
        let all = lines(&out);
        assert_eq!(all[0], "#if OS(DARWIN)");
        assert_eq!(all[1], "L_offlineasm_loh_adrp_0:");
        assert_eq!(all[2], "adrp c0, _g_config@GOTPAGE");
        assert_eq!(all[4], "ldr c0, [c0, _g_config@GOTPAGEOFF]");
        assert_eq!(all[5], "#elif OS(LINUX) || OS(FREEBSD)");
        assert_eq!(all[6], "adrp c0, :got:_g_config");
        // The .loh directive lands after the unit body.
        assert!(out.ends_with(
            "#if OS(DARWIN)\n    .loh AdrpLdrGot L_offlineasm_loh_adrp_0, L_offlineasm_loh_ldr_0\n#endif\n"
        ));
    }

    #[test]
    fn test_unsupported_capability_opcodes_fail() {
        for opcode in [
            Opcode::Orp,
            Opcode::Xorp,
            Opcode::Lshiftp,
            Opcode::Urshiftp,
            Opcode::Mulp,
            Opcode::Movdz,
        ] {
            let err = emit_unit(
                &[insn(opcode, vec![t(GprRole::T0), t(GprRole::T1)])],
                Options::default(),
            )
            .unwrap_err();
            assert!(
                matches!(err, BackendError::UnsupportedOpcodeForTarget { .. }),
                "{:?} should be unsupported",
                opcode
            );
        }
    }

    #[test]
    fn test_peek_poke_scale_slot_index() {
        let out = emit_one(insn(Opcode::Peek, vec![Operand::Imm(3), t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["ldr x0, [sp, #24]"]);
        let out = emit_one(insn(Opcode::Poke, vec![Operand::Imm(2), t(GprRole::T1)]));
        assert_eq!(lines(&out), vec!["str x1, [sp, #16]"]);
    }

    #[test]
    fn test_jmp_and_call_register_forms_use_capability() {
        let out = emit_one(insn(Opcode::Jmp, vec![t(GprRole::T0)]));
        assert_eq!(lines(&out), vec!["br c0"]);
        let out = emit_one(insn(Opcode::Call, vec![Operand::label("_helper")]));
        assert_eq!(lines(&out), vec!["bl _helper"]);
    }

    #[test]
    fn test_print_and_makecap_are_comments() {
        let out = emit_one(insn(Opcode::Printi, vec![t(GprRole::T0)]));
        assert_eq!(
            out,
            "/* print instructions not supported on this target */\n"
        );
        let out = emit_one(insn(Opcode::Makecap, vec![t(GprRole::T0)]));
        assert_eq!(out, "/* makecap instruction is NOP */\n");
    }

    #[test]
    fn test_fused_branch_reaching_selector_is_an_error() {
        let err = emit_unit(
            &[insn(
                Opcode::Baddiz,
                vec![t(GprRole::T0), t(GprRole::T1), Operand::label("_l")],
            )],
            Options::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::UnresolvedOperand { .. }));
    }
}
