//! Machine-instruction lifter: decoded AArch64 instructions in, relift IR
//! out.
//!
//! The lifter consumes pre-decoded instructions; disassembly itself happens
//! upstream. Output ordering matches input ordering, and every translation
//! is a fixed, deterministic IR sequence.

pub mod aarch64;
pub mod cond;
pub mod inst;
pub mod regs;

mod error;

pub use aarch64::Lifter;
pub use cond::Cond;
pub use error::LiftError;
pub use inst::{Extend, IndexReg, MachInst, MemOperand, Mnemonic, Operand, ShiftOp, Writeback};
pub use regs::{bind_registers, RegMap};
