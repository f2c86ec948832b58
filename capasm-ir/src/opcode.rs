//! The closed opcode vocabulary of the pseudo-instruction set
//!
//! Opcode names follow the offline assembler's conventions: a family stem
//! plus a width suffix (`i` = 32-bit word, `p` = capability pointer,
//! `q` = 64-bit quad, `b` = byte, `h` = halfword, `d` = double float).
//! Branch opcodes are `b` + width + condition, boolean compares are
//! `c` + width + condition, test-and-branch pseudo-ops are `bt` + width +
//! flag. An opcode outside this vocabulary cannot be represented at all;
//! opcodes inside it that this particular backend does not support fail at
//! selection time with an explicit error.

use std::fmt;

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal,)+) => {
        /// A pseudo-instruction opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)+
        }

        impl Opcode {
            /// The textual mnemonic, as written in the assembly source.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)+
                }
            }

            /// Look an opcode up by mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $($mnemonic => Some(Opcode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // Word/pointer/quad arithmetic.
    Addi => "addi",
    Addis => "addis",
    Addp => "addp",
    Addps => "addps",
    Addq => "addq",
    Addqs => "addqs",
    Subi => "subi",
    Subis => "subis",
    Subp => "subp",
    Subq => "subq",
    Subqs => "subqs",
    Negi => "negi",
    Negp => "negp",
    Negq => "negq",
    Muli => "muli",
    Mulp => "mulp",
    Mulq => "mulq",
    Smulli => "smulli",

    // Bitwise and shifts.
    Andi => "andi",
    Andp => "andp",
    Andq => "andq",
    Ori => "ori",
    Orp => "orp",
    Orq => "orq",
    Xori => "xori",
    Xorp => "xorp",
    Xorq => "xorq",
    Noti => "noti",
    Notq => "notq",
    Lshifti => "lshifti",
    Lshiftp => "lshiftp",
    Lshiftq => "lshiftq",
    Rshifti => "rshifti",
    Rshiftp => "rshiftp",
    Rshiftq => "rshiftq",
    Urshifti => "urshifti",
    Urshiftp => "urshiftp",
    Urshiftq => "urshiftq",

    // Loads and stores.
    Loadi => "loadi",
    Loadis => "loadis",
    Loadp => "loadp",
    Loadq => "loadq",
    Loadv => "loadv",
    Loadvmc => "loadvmc",
    Loadb => "loadb",
    Loadbsi => "loadbsi",
    Loadbsq => "loadbsq",
    Loadh => "loadh",
    Loadhsi => "loadhsi",
    Loadhsq => "loadhsq",
    Loadd => "loadd",
    Storei => "storei",
    Storep => "storep",
    Storeq => "storeq",
    Storev => "storev",
    Storeb => "storeb",
    Storeh => "storeh",
    Stored => "stored",

    // Double-precision arithmetic and conversions.
    Addd => "addd",
    Subd => "subd",
    Muld => "muld",
    Divd => "divd",
    Sqrtd => "sqrtd",
    Ci2d => "ci2d",
    Td2i => "td2i",
    Btd2i => "btd2i",
    Bcd2i => "bcd2i",
    Movdz => "movdz",
    Fp2d => "fp2d",
    Fq2d => "fq2d",
    Fd2p => "fd2p",
    Fd2q => "fd2q",

    // Double-precision branches (the *un forms tolerate NaN operands).
    Bdeq => "bdeq",
    Bdneq => "bdneq",
    Bdgt => "bdgt",
    Bdgteq => "bdgteq",
    Bdlt => "bdlt",
    Bdlteq => "bdlteq",
    Bdequn => "bdequn",
    Bdnequn => "bdnequn",
    Bdgtun => "bdgtun",
    Bdgtequn => "bdgtequn",
    Bdltun => "bdltun",
    Bdltequn => "bdltequn",

    // Moves, extensions, and capability reconstruction.
    Move => "move",
    Movep => "movep",
    Moved => "moved",
    Sxi2p => "sxi2p",
    Sxi2q => "sxi2q",
    Zxi2p => "zxi2p",
    Zxi2q => "zxi2q",
    Cvtz => "cvtz",
    Makecap => "makecap",

    // Address computation.
    Leai => "leai",
    Leap => "leap",
    Leaq => "leaq",
    Globaladdr => "globaladdr",
    Pcrtoaddr => "pcrtoaddr",

    // Stack.
    Pushq => "pushq",
    Pushp => "pushp",
    Popq => "popq",
    Popp => "popp",
    Peek => "peek",
    Poke => "poke",

    // Control flow and misc.
    Jmp => "jmp",
    Call => "call",
    Ret => "ret",
    Break => "break",
    Nop => "nop",
    Memfence => "memfence",
    Bfiq => "bfiq",
    Print => "print",
    Printi => "printi",
    Printb => "printb",
    Printq => "printq",
    Printp => "printp",
    Printc => "printc",

    // Flag branches (consumed directly, or produced by the generic
    // branch-fusion lowering passes).
    Bo => "bo",
    Bs => "bs",
    Bz => "bz",
    Bnz => "bnz",

    // Integer/pointer comparison branches: b + width + condition.
    Bieq => "bieq",
    Bineq => "bineq",
    Bia => "bia",
    Biaeq => "biaeq",
    Bib => "bib",
    Bibeq => "bibeq",
    Bigt => "bigt",
    Bigteq => "bigteq",
    Bilt => "bilt",
    Bilteq => "bilteq",
    Bbeq => "bbeq",
    Bbneq => "bbneq",
    Bba => "bba",
    Bbaeq => "bbaeq",
    Bbb => "bbb",
    Bbbeq => "bbbeq",
    Bbgt => "bbgt",
    Bbgteq => "bbgteq",
    Bblt => "bblt",
    Bblteq => "bblteq",
    Bpeq => "bpeq",
    Bpneq => "bpneq",
    Bpa => "bpa",
    Bpaeq => "bpaeq",
    Bpb => "bpb",
    Bpbeq => "bpbeq",
    Bpgt => "bpgt",
    Bpgteq => "bpgteq",
    Bplt => "bplt",
    Bplteq => "bplteq",
    Bqeq => "bqeq",
    Bqneq => "bqneq",
    Bqa => "bqa",
    Bqaeq => "bqaeq",
    Bqb => "bqb",
    Bqbeq => "bqbeq",
    Bqgt => "bqgt",
    Bqgteq => "bqgteq",
    Bqlt => "bqlt",
    Bqlteq => "bqlteq",

    // Boolean-producing comparisons: c + width + condition.
    Cieq => "cieq",
    Cineq => "cineq",
    Cia => "cia",
    Ciaeq => "ciaeq",
    Cib => "cib",
    Cibeq => "cibeq",
    Cigt => "cigt",
    Cigteq => "cigteq",
    Cilt => "cilt",
    Cilteq => "cilteq",
    Cbeq => "cbeq",
    Cbneq => "cbneq",
    Cba => "cba",
    Cbaeq => "cbaeq",
    Cbb => "cbb",
    Cbbeq => "cbbeq",
    Cbgt => "cbgt",
    Cbgteq => "cbgteq",
    Cblt => "cblt",
    Cblteq => "cblteq",
    Cpeq => "cpeq",
    Cpneq => "cpneq",
    Cpa => "cpa",
    Cpaeq => "cpaeq",
    Cpb => "cpb",
    Cpbeq => "cpbeq",
    Cpgt => "cpgt",
    Cpgteq => "cpgteq",
    Cplt => "cplt",
    Cplteq => "cplteq",
    Cqeq => "cqeq",
    Cqneq => "cqneq",
    Cqa => "cqa",
    Cqaeq => "cqaeq",
    Cqb => "cqb",
    Cqbeq => "cqbeq",
    Cqgt => "cqgt",
    Cqgteq => "cqgteq",
    Cqlt => "cqlt",
    Cqlteq => "cqlteq",

    // Test-and-branch pseudo-ops: bt + width + flag.
    Btiz => "btiz",
    Btinz => "btinz",
    Btis => "btis",
    Btbz => "btbz",
    Btbnz => "btbnz",
    Btbs => "btbs",
    Btpz => "btpz",
    Btpnz => "btpnz",
    Btps => "btps",
    Btqz => "btqz",
    Btqnz => "btqnz",
    Btqs => "btqs",

    // Arithmetic-branch fusions, eliminated by the generic lowering passes.
    Baddiz => "baddiz",
    Baddinz => "baddinz",
    Baddis => "baddis",
    Baddio => "baddio",
    Bsubiz => "bsubiz",
    Bsubinz => "bsubinz",
    Bsubis => "bsubis",
    Bsubio => "bsubio",
    Boriz => "boriz",
    Borinz => "borinz",
    Boris => "boris",
    Baddqz => "baddqz",
    Baddqnz => "baddqnz",
    Baddqs => "baddqs",
    Baddqo => "baddqo",
    Bsubqz => "bsubqz",
    Bsubqnz => "bsubqnz",
    Bsubqs => "bsubqs",
    Bsubqo => "bsubqo",
    Borqz => "borqz",
    Borqnz => "borqnz",
    Borqs => "borqs",
}

impl Opcode {
    /// True for every memory-load opcode (`load*`).
    pub fn is_load(self) -> bool {
        self.mnemonic().starts_with("load")
    }

    /// True for every memory-store opcode (`store*`).
    pub fn is_store(self) -> bool {
        self.mnemonic().starts_with("store")
    }

    /// True for the address-computation family (`lea*`).
    pub fn is_lea(self) -> bool {
        self.mnemonic().starts_with("lea")
    }

    /// True for the print family, which is comment-only on some targets.
    pub fn is_print(self) -> bool {
        self.mnemonic().starts_with("print")
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
