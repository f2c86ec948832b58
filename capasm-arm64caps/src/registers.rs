//! The width-class register model
//!
//! Naming conventions on this target:
//!
//! - `c<n>`: GPR holding a capability (128-bit pointer representation).
//! - `x<n>`: the same GPR in plain 64-bit integer mode.
//! - `w<n>`: the low 32 bits of the GPR; writes zero-fill the high half.
//! - `d<n>`: FPR as an IEEE 64-bit double.
//!
//! GPR role assignments match the runtime's baseline JIT convention:
//! `t0/a0/r0` share `c0` through `t3/a3` on `c3`, `t4`/`t5` on `c4`/`c5`,
//! the callee-saved roles occupy `c19`..`c28`, and the frame pointer is
//! `c29`. The stack pointer and link register have irregular names (`csp`
//! vs `sp`, and `clr` at every width). `c6`/`c7` and `q31` are reserved as
//! pipeline scratch registers and never appear in input IR.

use capasm_ir::{FprRole, GprRole, ScratchReg, TmpClass};

/// The four width classes every rendering operation is parameterized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthClass {
    /// 32-bit integer (`w` registers).
    Word,
    /// 128-bit capability (`c` registers).
    Ptr,
    /// 64-bit integer (`x` registers).
    Quad,
    /// 64-bit float (`d` registers).
    Double,
}

impl WidthClass {
    /// The GPR name prefix for this width, or `None` for the float class.
    pub fn gpr_prefix(self) -> Option<char> {
        match self {
            WidthClass::Word => Some('w'),
            WidthClass::Ptr => Some('c'),
            WidthClass::Quad => Some('x'),
            WidthClass::Double => None,
        }
    }

    /// The zero register at this width.
    pub fn zero_register(self) -> Option<&'static str> {
        match self {
            WidthClass::Word => Some("wzr"),
            WidthClass::Ptr => Some("czr"),
            WidthClass::Quad => Some("xzr"),
            WidthClass::Double => None,
        }
    }
}

/// The two GPRs the legalization passes may clobber.
pub const EXTRA_GPRS: &[ScratchReg] = &[ScratchReg::gpr(6), ScratchReg::gpr(7)];

/// The one FPR the legalization passes may clobber.
pub const EXTRA_FPRS: &[ScratchReg] = &[ScratchReg::fpr(31)];

/// The GPR slot a role occupies, or `None` for the roles with irregular
/// physical names (stack pointer, link register).
pub fn gpr_role_slot(role: GprRole) -> Option<u8> {
    use GprRole::*;
    match role {
        T0 | A0 | R0 => Some(0),
        T1 | A1 | R1 => Some(1),
        T2 | A2 => Some(2),
        T3 | A3 => Some(3),
        T4 => Some(4),
        T5 => Some(5),
        Csr0 => Some(19),
        Csr1 => Some(20),
        Csr2 => Some(21),
        Csr3 => Some(22),
        Csr4 => Some(23),
        Csr5 => Some(24),
        Csr6 => Some(25),
        Csr7 => Some(26),
        Csr8 => Some(27),
        Csr9 => Some(28),
        Cfr => Some(29),
        Sp | Lr => None,
    }
}

/// The FPR slot a role occupies.
pub fn fpr_role_slot(role: FprRole) -> u8 {
    use FprRole::*;
    match role {
        Ft0 | Fa0 | Fr => 0,
        Ft1 | Fa1 => 1,
        Ft2 | Fa2 => 2,
        Ft3 | Fa3 => 3,
        Ft4 => 4,
        Ft5 => 5,
        Csfr0 => 8,
        Csfr1 => 9,
        Csfr2 => 10,
        Csfr3 => 11,
        Csfr4 => 12,
        Csfr5 => 13,
        Csfr6 => 14,
        Csfr7 => 15,
    }
}

/// Physical name of a GPR role at a width, or `None` when the width has no
/// GPR rendering (the float class).
pub fn gpr_text(role: GprRole, width: WidthClass) -> Option<String> {
    match role {
        GprRole::Sp => Some(if width == WidthClass::Ptr { "csp" } else { "sp" }.to_string()),
        GprRole::Lr => Some("clr".to_string()),
        _ => {
            let prefix = width.gpr_prefix()?;
            // Slot is always present once Sp/Lr are peeled off.
            let slot = gpr_role_slot(role)?;
            Some(format!("{}{}", prefix, slot))
        }
    }
}

/// Physical name of an FPR role; only the double width renders FPRs.
pub fn fpr_text(role: FprRole, width: WidthClass) -> Option<String> {
    if width != WidthClass::Double {
        return None;
    }
    Some(format!("d{}", fpr_role_slot(role)))
}

/// Physical name of a reserved scratch register at a width.
pub fn scratch_text(reg: ScratchReg, width: WidthClass) -> Option<String> {
    match reg.class {
        TmpClass::Gpr => {
            let prefix = width.gpr_prefix()?;
            Some(format!("{}{}", prefix, reg.slot))
        }
        TmpClass::Fpr => {
            if width != WidthClass::Double {
                return None;
            }
            Some(format!("d{}", reg.slot))
        }
    }
}
