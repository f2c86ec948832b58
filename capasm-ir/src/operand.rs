//! Operand variants of the pseudo-instruction IR
//!
//! Operands form a closed tagged variant: every backend renders them with
//! one exhaustive match, so "every variant handled" is checked at compile
//! time rather than discovered at run time.

use std::fmt;

/// Symbolic general-purpose register roles. The same role resolves to a
/// different physical register name per width class; the mapping is owned
/// by each backend's register model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GprRole {
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    A0,
    A1,
    A2,
    A3,
    R0,
    R1,
    /// Frame pointer.
    Cfr,
    /// Stack pointer. Irregular physical names on most targets.
    Sp,
    /// Link register.
    Lr,
    Csr0,
    Csr1,
    Csr2,
    Csr3,
    Csr4,
    Csr5,
    Csr6,
    Csr7,
    Csr8,
    Csr9,
}

impl GprRole {
    pub fn is_sp(self) -> bool {
        self == GprRole::Sp
    }
}

/// Symbolic floating-point register roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FprRole {
    Ft0,
    Ft1,
    Ft2,
    Ft3,
    Ft4,
    Ft5,
    Fa0,
    Fa1,
    Fa2,
    Fa3,
    Fr,
    Csfr0,
    Csfr1,
    Csfr2,
    Csfr3,
    Csfr4,
    Csfr5,
    Csfr6,
    Csfr7,
}

/// Register class of a temporary or scratch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TmpClass {
    Gpr,
    Fpr,
}

/// A specific physical register reserved by a backend for pipeline-internal
/// use. Never present in input IR; introduced by legalization passes and by
/// the temporary allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchReg {
    pub class: TmpClass,
    pub slot: u8,
}

impl ScratchReg {
    pub const fn gpr(slot: u8) -> Self {
        Self {
            class: TmpClass::Gpr,
            slot,
        }
    }

    pub const fn fpr(slot: u8) -> Self {
        Self {
            class: TmpClass::Fpr,
            slot,
        }
    }
}

/// A placeholder for a register that has not been physically assigned yet.
/// Must be fully eliminated by the allocator before selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tmp {
    pub id: u32,
    pub class: TmpClass,
}

/// Hands out temporaries with unique ids for one translation unit.
#[derive(Debug, Default)]
pub struct TmpFactory {
    next: u32,
}

impl TmpFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, class: TmpClass) -> Tmp {
        let id = self.next;
        self.next += 1;
        Tmp { id, class }
    }
}

/// Base-plus-displacement memory reference. `wide_base` selects a
/// capability-typed base register (wider legal offset ranges) over an
/// integer/compressed-offset base (narrower ranges).
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub base: Box<Operand>,
    pub offset: i64,
    pub wide_base: bool,
}

/// Base + (index << scale_shift) memory reference. Only encodable when the
/// residual offset is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseIndex {
    pub base: Box<Operand>,
    pub index: Box<Operand>,
    pub scale_shift: u8,
    pub offset: i64,
    pub wide_base: bool,
}

impl BaseIndex {
    /// The byte scale implied by the shift.
    pub fn scale(&self) -> i64 {
        1 << self.scale_shift
    }
}

/// An operand of a pseudo-instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Gpr(GprRole),
    Fpr(FprRole),
    Scratch(ScratchReg),
    Tmp(Tmp),
    Imm(i64),
    Address(Address),
    BaseIndex(BaseIndex),
    /// A raw address that no pass has rewritten to a register-relative form
    /// yet. Reaching the selector with one of these is a fatal internal
    /// error on targets that cannot materialize absolute addresses.
    AbsoluteAddress(i64),
    /// A symbolic reference to a global label, plus a byte offset.
    LabelRef { label: String, offset: i64 },
    /// A reference to an assembler-local label.
    LocalLabelRef { label: String },
}

impl Operand {
    /// Shorthand for a capability-based address with the given offset.
    pub fn address(base: Operand, offset: i64) -> Operand {
        Operand::Address(Address {
            base: Box::new(base),
            offset,
            wide_base: true,
        })
    }

    /// Shorthand for a compressed-base (integer) address.
    pub fn narrow_address(base: Operand, offset: i64) -> Operand {
        Operand::Address(Address {
            base: Box::new(base),
            offset,
            wide_base: false,
        })
    }

    pub fn base_index(base: Operand, index: Operand, scale_shift: u8) -> Operand {
        Operand::BaseIndex(BaseIndex {
            base: Box::new(base),
            index: Box::new(index),
            scale_shift,
            offset: 0,
            wide_base: true,
        })
    }

    pub fn label(label: &str) -> Operand {
        Operand::LabelRef {
            label: label.to_string(),
            offset: 0,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }

    pub fn imm_value(&self) -> Option<i64> {
        match self {
            Operand::Imm(v) => Some(*v),
            _ => None,
        }
    }

    /// True for anything that resolves to a register at emission time.
    pub fn is_register(&self) -> bool {
        matches!(
            self,
            Operand::Gpr(_) | Operand::Fpr(_) | Operand::Scratch(_) | Operand::Tmp(_)
        )
    }

    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Operand::Address(_) | Operand::BaseIndex(_) | Operand::AbsoluteAddress(_)
        )
    }

    pub fn is_label(&self) -> bool {
        matches!(
            self,
            Operand::LabelRef { .. } | Operand::LocalLabelRef { .. }
        )
    }

    pub fn is_sp(&self) -> bool {
        matches!(self, Operand::Gpr(role) if role.is_sp())
    }

    /// Walk every temporary mentioned by this operand, including the base
    /// and index registers of memory references.
    pub fn for_each_tmp(&self, f: &mut impl FnMut(Tmp)) {
        match self {
            Operand::Tmp(tmp) => f(*tmp),
            Operand::Address(addr) => addr.base.for_each_tmp(f),
            Operand::BaseIndex(bi) => {
                bi.base.for_each_tmp(f);
                bi.index.for_each_tmp(f);
            }
            _ => {}
        }
    }

    /// Rebuild this operand with every temporary replaced through `f`.
    /// Temporaries `f` returns `None` for are left in place.
    pub fn map_tmps(&self, f: &impl Fn(Tmp) -> Option<Operand>) -> Operand {
        match self {
            Operand::Tmp(tmp) => f(*tmp).unwrap_or_else(|| self.clone()),
            Operand::Address(addr) => Operand::Address(Address {
                base: Box::new(addr.base.map_tmps(f)),
                offset: addr.offset,
                wide_base: addr.wide_base,
            }),
            Operand::BaseIndex(bi) => Operand::BaseIndex(BaseIndex {
                base: Box::new(bi.base.map_tmps(f)),
                index: Box::new(bi.index.map_tmps(f)),
                scale_shift: bi.scale_shift,
                offset: bi.offset,
                wide_base: bi.wide_base,
            }),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Gpr(role) => write!(f, "{:?}", role),
            Operand::Fpr(role) => write!(f, "{:?}", role),
            Operand::Scratch(reg) => write!(f, "scratch({:?}{})", reg.class, reg.slot),
            Operand::Tmp(tmp) => write!(f, "tmp{}", tmp.id),
            Operand::Imm(v) => write!(f, "{}", v),
            Operand::Address(addr) => write!(f, "[{}, {}]", addr.base, addr.offset),
            Operand::BaseIndex(bi) => {
                write!(f, "[{}, {} << {}, {}]", bi.base, bi.index, bi.scale_shift, bi.offset)
            }
            Operand::AbsoluteAddress(v) => write!(f, "absolute({})", v),
            Operand::LabelRef { label, offset } => write!(f, "{}+{}", label, offset),
            Operand::LocalLabelRef { label } => write!(f, "{}", label),
        }
    }
}
