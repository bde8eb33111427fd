//! Per-architecture ABI tables for the relift middle-end.
//!
//! An [`Abi`] is an immutable record: the ordered parameter and return
//! register sequences, the stack-parameter direction, the word size, and the
//! register universe with sub-register aliasing. It is built once per
//! architecture and only ever queried afterwards; architecture-specific
//! behavior is a dispatch on the [`Arch`] tag, not runtime polymorphism.

use std::fmt;

use cranelift_entity::packed_option::PackedOption;
use thiserror::Error;

pub mod reg;

mod conv;

pub use reg::{Reg, RegBank, RegClass, RegData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X64,
    Aarch64,
    Arm,
    Mips,
    PowerPc,
}

impl Arch {
    pub fn word_bits(self) -> u16 {
        match self {
            Self::X86 | Self::Arm | Self::Mips | Self::PowerPc => 32,
            Self::X64 | Self::Aarch64 => 64,
        }
    }

    pub fn default_call_conv(self) -> CallConv {
        match self {
            Self::X86 => CallConv::Cdecl,
            Self::X64 => CallConv::SysV,
            Self::Aarch64 => CallConv::Aapcs64,
            Self::Arm => CallConv::Aapcs,
            Self::Mips => CallConv::O32,
            Self::PowerPc => CallConv::PpcSysV,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::X86 => "x86",
            Self::X64 => "x86-64",
            Self::Aarch64 => "aarch64",
            Self::Arm => "arm",
            Self::Mips => "mips",
            Self::PowerPc => "powerpc",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    Cdecl,
    Stdcall,
    Fastcall,
    Watcom,
    SysV,
    Ms,
    Aapcs64,
    Aapcs,
    O32,
    PpcSysV,
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cdecl => "cdecl",
            Self::Stdcall => "stdcall",
            Self::Fastcall => "fastcall",
            Self::Watcom => "watcom",
            Self::SysV => "sysv",
            Self::Ms => "ms",
            Self::Aapcs64 => "aapcs64",
            Self::Aapcs => "aapcs",
            Self::O32 => "o32",
            Self::PpcSysV => "ppc-sysv",
        };
        write!(f, "{s}")
    }
}

/// Direction in which outgoing stack parameters are laid out relative to the
/// stack pointer at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDir {
    /// First argument at the lowest address, later arguments above it.
    AscendingFromSp,
    /// First argument at the highest address, later arguments below it.
    DescendingFromSp,
}

/// The four condition flags of a flag-updating arithmetic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Negative: sign bit of the result.
    N,
    /// Zero: result == 0.
    Z,
    /// Carry: unsigned overflow on add, "no borrow" on subtract.
    C,
    /// Overflow: signed overflow.
    V,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::N, Flag::Z, Flag::C, Flag::V];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::N => 0,
            Self::Z => 1,
            Self::C => 2,
            Self::V => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("calling convention `{conv}` is not defined for `{arch}`")]
    UnsupportedConvention { arch: Arch, conv: CallConv },
}

/// An immutable calling-convention description for one architecture.
#[derive(Debug)]
pub struct Abi {
    pub(crate) arch: Arch,
    pub(crate) conv: CallConv,
    pub(crate) bank: RegBank,
    pub(crate) param_gprs: Vec<Reg>,
    pub(crate) param_fprs: Vec<Reg>,
    pub(crate) return_gprs: Vec<Reg>,
    pub(crate) return_fprs: Vec<Reg>,
    pub(crate) sp: Reg,
    pub(crate) lr: PackedOption<Reg>,
    pub(crate) flags: [PackedOption<Reg>; 4],
    pub(crate) stack_param_dir: StackDir,
    pub(crate) max_regs_per_param: u8,
}

impl Abi {
    /// Builds the ABI for `arch` with its default calling convention.
    pub fn with_default_conv(arch: Arch) -> Self {
        // The default pairing is always defined.
        Self::new(arch, arch.default_call_conv()).unwrap()
    }

    /// Builds the ABI for the given architecture/convention pair.
    pub fn new(arch: Arch, conv: CallConv) -> Result<Self, AbiError> {
        conv::build(arch, conv)
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn call_conv(&self) -> CallConv {
        self.conv
    }

    pub fn bank(&self) -> &RegBank {
        &self.bank
    }

    /// Ordered parameter GPR sequence.
    pub fn param_gprs(&self) -> &[Reg] {
        &self.param_gprs
    }

    /// Ordered parameter FP-register sequence.
    pub fn param_fprs(&self) -> &[Reg] {
        &self.param_fprs
    }

    pub fn return_gprs(&self) -> &[Reg] {
        &self.return_gprs
    }

    pub fn return_fprs(&self) -> &[Reg] {
        &self.return_fprs
    }

    pub fn stack_param_dir(&self) -> StackDir {
        self.stack_param_dir
    }

    /// How many consecutive registers may pair up to carry one
    /// wider-than-word parameter.
    pub fn max_regs_per_param(&self) -> u8 {
        self.max_regs_per_param
    }

    pub fn word_bits(&self) -> u16 {
        self.arch.word_bits()
    }

    /// Byte size of one stack parameter slot.
    pub fn slot_bytes(&self) -> i32 {
        i32::from(self.arch.word_bits()) / 8
    }

    pub fn stack_pointer(&self) -> Reg {
        self.sp
    }

    pub fn link_register(&self) -> Option<Reg> {
        self.lr.expand()
    }

    pub fn flag(&self, flag: Flag) -> Option<Reg> {
        self.flags[flag.index()].expand()
    }

    pub fn is_flag(&self, reg: Reg) -> bool {
        self.bank.class(reg) == RegClass::Flag
    }

    pub fn is_stack_pointer(&self, reg: Reg) -> bool {
        self.bank.parent_of(reg) == self.sp
    }

    pub fn is_link_register(&self, reg: Reg) -> bool {
        self.lr.expand() == Some(self.bank.parent_of(reg))
    }

    /// Resolves to the widest alias of `reg`.
    pub fn parent_of(&self, reg: Reg) -> Reg {
        self.bank.parent_of(reg)
    }

    pub fn reg_by_name(&self, name: &str) -> Option<Reg> {
        self.bank.by_name(name)
    }
}
