//! The decoded machine-instruction model the lifter consumes.
//!
//! Instructions arrive pre-decoded; the lifter never touches bytes. Label
//! operands carry absolute addresses except for `adr`/`adrp`, whose raw
//! immediates the lifter resolves itself.

use relift_abi::Reg;
use smallvec::SmallVec;

use crate::cond::Cond;

/// One decoded machine instruction.
#[derive(Debug, Clone)]
pub struct MachInst {
    pub address: u64,
    pub mnemonic: Mnemonic,
    pub operands: SmallVec<[Operand; 4]>,
    /// The `.S` form: update NZCV.
    pub set_flags: bool,
    /// Condition field of `b.cond`, `csel`, `cset`, ...
    pub cond: Option<Cond>,
}

impl MachInst {
    pub fn new(address: u64, mnemonic: Mnemonic) -> Self {
        Self {
            address,
            mnemonic,
            operands: SmallVec::new(),
            set_flags: false,
            cond: None,
        }
    }

    pub fn op(mut self, op: impl Into<Operand>) -> Self {
        self.operands.push(op.into());
        self
    }

    pub fn flags(mut self) -> Self {
        self.set_flags = true;
        self
    }

    pub fn with_cond(mut self, cond: Cond) -> Self {
        self.cond = Some(cond);
        self
    }
}

/// The opcode surface the lifter recognizes. Opcodes outside the translated
/// subset (system operations at the end) go down the opaque-intrinsic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc,
    Add,
    Adr,
    Adrp,
    And,
    Asr,
    B,
    Bl,
    Blr,
    Br,
    Cbnz,
    Cbz,
    Cmn,
    Cmp,
    Csel,
    Cset,
    Csetm,
    Csinc,
    Eor,
    Ldp,
    Ldpsw,
    Ldr,
    Ldrb,
    Ldrh,
    Ldrsb,
    Ldrsh,
    Ldrsw,
    Lsl,
    Lsr,
    Madd,
    Mneg,
    Mov,
    Movk,
    Movn,
    Movz,
    Msub,
    Mul,
    Mvn,
    Neg,
    Nop,
    Orr,
    Ret,
    Ror,
    Sbc,
    Stp,
    Str,
    Strb,
    Strh,
    Sub,
    Tbnz,
    Tbz,
    Tst,
    // Untranslated system operations.
    Brk,
    Dmb,
    Svc,
}

impl Mnemonic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adc => "adc",
            Self::Add => "add",
            Self::Adr => "adr",
            Self::Adrp => "adrp",
            Self::And => "and",
            Self::Asr => "asr",
            Self::B => "b",
            Self::Bl => "bl",
            Self::Blr => "blr",
            Self::Br => "br",
            Self::Cbnz => "cbnz",
            Self::Cbz => "cbz",
            Self::Cmn => "cmn",
            Self::Cmp => "cmp",
            Self::Csel => "csel",
            Self::Cset => "cset",
            Self::Csetm => "csetm",
            Self::Csinc => "csinc",
            Self::Eor => "eor",
            Self::Ldp => "ldp",
            Self::Ldpsw => "ldpsw",
            Self::Ldr => "ldr",
            Self::Ldrb => "ldrb",
            Self::Ldrh => "ldrh",
            Self::Ldrsb => "ldrsb",
            Self::Ldrsh => "ldrsh",
            Self::Ldrsw => "ldrsw",
            Self::Lsl => "lsl",
            Self::Lsr => "lsr",
            Self::Madd => "madd",
            Self::Mneg => "mneg",
            Self::Mov => "mov",
            Self::Movk => "movk",
            Self::Movn => "movn",
            Self::Movz => "movz",
            Self::Msub => "msub",
            Self::Mul => "mul",
            Self::Mvn => "mvn",
            Self::Neg => "neg",
            Self::Nop => "nop",
            Self::Orr => "orr",
            Self::Ret => "ret",
            Self::Ror => "ror",
            Self::Sbc => "sbc",
            Self::Stp => "stp",
            Self::Str => "str",
            Self::Strb => "strb",
            Self::Strh => "strh",
            Self::Sub => "sub",
            Self::Tbnz => "tbnz",
            Self::Tbz => "tbz",
            Self::Tst => "tst",
            Self::Brk => "brk",
            Self::Dmb => "dmb",
            Self::Svc => "svc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Operand extension modifier: truncate to the source width, then zero- or
/// sign-extend back to the destination width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extend {
    Uxtb,
    Uxth,
    Uxtw,
    Uxtx,
    Sxtb,
    Sxth,
    Sxtw,
    Sxtx,
}

impl Extend {
    pub fn src_bits(self) -> u16 {
        match self {
            Self::Uxtb | Self::Sxtb => 8,
            Self::Uxth | Self::Sxth => 16,
            Self::Uxtw | Self::Sxtw => 32,
            Self::Uxtx | Self::Sxtx => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Sxtb | Self::Sxth | Self::Sxtw | Self::Sxtx)
    }
}

/// Base-register update mode of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Writeback {
    #[default]
    None,
    /// `[base, off]!`: base is updated before the access; the access uses
    /// the new address.
    Pre,
    /// `[base], off`: the access uses the old base; base is updated after.
    Post,
}

/// A register index of a memory operand, with optional extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReg {
    pub reg: Reg,
    pub extend: Option<Extend>,
    pub shift: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: Reg,
    pub disp: i64,
    pub index: Option<IndexReg>,
    pub writeback: Writeback,
}

impl MemOperand {
    pub fn base(base: Reg) -> Self {
        Self {
            base,
            disp: 0,
            index: None,
            writeback: Writeback::None,
        }
    }

    pub fn base_disp(base: Reg, disp: i64) -> Self {
        Self {
            base,
            disp,
            index: None,
            writeback: Writeback::None,
        }
    }

    pub fn pre_index(mut self) -> Self {
        self.writeback = Writeback::Pre;
        self
    }

    pub fn post_index(mut self) -> Self {
        self.writeback = Writeback::Post;
        self
    }

    pub fn indexed(base: Reg, index: Reg, extend: Option<Extend>, shift: u8) -> Self {
        Self {
            base,
            disp: 0,
            index: Some(IndexReg {
                reg: index,
                extend,
                shift,
            }),
            writeback: Writeback::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    /// An immediate with a left shift still to apply (`movk`/`movz`).
    ShiftedImm { imm: i64, shift: u8 },
    Mem(MemOperand),
    /// An absolute code address.
    Label(u64),
    ShiftedReg { reg: Reg, op: ShiftOp, amount: u8 },
    ExtReg { reg: Reg, extend: Extend, shift: u8 },
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<i64> for Operand {
    fn from(imm: i64) -> Self {
        Operand::Imm(imm)
    }
}

impl From<MemOperand> for Operand {
    fn from(mem: MemOperand) -> Self {
        Operand::Mem(mem)
    }
}
