//! The AArch64 instruction translator.
//!
//! Translation is deterministic and linear per instruction: compute
//! effective operands (extension and shift applied), perform the core
//! semantic operation, write the destination, update flags for `.S` forms.
//! Register reads load the parent global and truncate; sub-register writes
//! zero-extend into the parent, as the architecture does.

use std::collections::{BTreeMap, BTreeSet};

use relift_abi::{Abi, Arch, Flag, Reg};
use relift_ir::{
    inst::CallTarget, BinaryOp, BlockId, CmpPred, FuncBuilder, FuncRef, Imm, InstData, Module,
    Type, UnaryOp, ValueId,
};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::{
    cond::Cond,
    error::{LiftError, Malformed},
    inst::{Extend, MachInst, MemOperand, Mnemonic, Operand, ShiftOp, Writeback},
    regs::{bind_registers, RegMap},
};

/// Lifts decoded AArch64 instruction streams into IR functions of one
/// module.
pub struct Lifter<'a> {
    module: &'a mut Module,
    abi: &'a Abi,
    regs: RegMap,
    symbols: FxHashMap<u64, FuncRef>,
}

impl<'a> Lifter<'a> {
    pub fn new(module: &'a mut Module, abi: &'a Abi) -> Result<Self, LiftError> {
        if abi.arch() != Arch::Aarch64 {
            return Err(LiftError::WrongArch(abi.arch()));
        }
        let regs = bind_registers(module, abi);
        Ok(Self {
            module,
            abi,
            regs,
            symbols: FxHashMap::default(),
        })
    }

    /// Registers a known function entry point; `bl` to this address becomes
    /// a direct call.
    pub fn add_symbol(&mut self, address: u64, func: FuncRef) {
        self.symbols.insert(address, func);
    }

    /// Translates one contiguous instruction sequence into a new function.
    pub fn lift_function(
        &mut self,
        name: &str,
        insts: &[MachInst],
    ) -> Result<FuncRef, LiftError> {
        if insts.is_empty() {
            return Err(LiftError::EmptyBody(name.to_owned()));
        }
        let func = self.module.declare_function(name);

        let starts = block_starts(insts);
        let mut body = BodyLifter {
            b: FuncBuilder::new(self.module, func),
            abi: self.abi,
            regs: &self.regs,
            symbols: &self.symbols,
            blocks: BTreeMap::new(),
        };
        for &addr in &starts {
            let block = body.b.append_block();
            body.blocks.insert(addr, block);
        }

        for inst in insts {
            if let Some(&block) = body.blocks.get(&inst.address) {
                if body.b.current_block().is_some() {
                    if !body.b.is_terminated() {
                        body.b.jump(block);
                    }
                }
                body.b.switch_to_block(block);
            }
            if let Err(Malformed(why)) = body.translate(inst) {
                let block = body.b.current_block().unwrap();
                warn!(
                    address = inst.address,
                    mnemonic = inst.mnemonic.as_str(),
                    why,
                    "translation error"
                );
                body.b.func_mut().failed_blocks.insert(block);
            }
        }

        // Close every open block; a function falling off its last
        // instruction returns.
        let func_mut = body.b.func_mut();
        let blocks: Vec<BlockId> = func_mut.layout.iter_block().collect();
        for block in blocks {
            let open = match func_mut.layout.last_inst_of(block) {
                Some(last) => !func_mut.dfg.is_terminator(last),
                None => true,
            };
            if open {
                func_mut.append_inst(InstData::Ret { value: None }, block);
            }
        }

        Ok(func)
    }
}

/// Addresses at which basic blocks begin.
fn block_starts(insts: &[MachInst]) -> BTreeSet<u64> {
    let start = insts[0].address;
    let end = insts.last().unwrap().address + 4;
    let mut starts = BTreeSet::new();
    starts.insert(start);

    for inst in insts {
        let local_branch = matches!(
            inst.mnemonic,
            Mnemonic::B | Mnemonic::Cbz | Mnemonic::Cbnz | Mnemonic::Tbz | Mnemonic::Tbnz
        );
        let leaves = matches!(inst.mnemonic, Mnemonic::Ret | Mnemonic::Br);
        if !local_branch && !leaves {
            continue;
        }
        if local_branch {
            for op in &inst.operands {
                if let Operand::Label(target) = op {
                    if (start..end).contains(target) {
                        starts.insert(*target);
                    }
                }
            }
        }
        let next = inst.address + 4;
        if next < end {
            starts.insert(next);
        }
    }
    starts
}

/// A pending post-indexed base update.
struct PostWb {
    reg: Reg,
    base: ValueId,
    disp: i64,
}

struct BodyLifter<'a, 'm> {
    b: FuncBuilder<'m>,
    abi: &'a Abi,
    regs: &'a RegMap,
    symbols: &'a FxHashMap<u64, FuncRef>,
    blocks: BTreeMap<u64, BlockId>,
}

impl BodyLifter<'_, '_> {
    fn translate(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        use Mnemonic::*;
        match inst.mnemonic {
            Adc => self.adc_like(inst, false),
            Sbc => self.adc_like(inst, true),
            Add => self.add_sub(inst, false),
            Sub => self.add_sub(inst, true),
            Cmp => self.compare(inst, true),
            Cmn => self.compare(inst, false),
            Neg => self.neg(inst),
            And => self.logical(inst, BinaryOp::And, false),
            Orr => self.logical(inst, BinaryOp::Or, false),
            Eor => self.logical(inst, BinaryOp::Xor, false),
            Tst => self.logical(inst, BinaryOp::And, true),
            Mvn => self.mvn(inst),
            Mul | Madd | Msub | Mneg => self.multiply(inst),
            Lsl => self.shift(inst, ShiftOp::Lsl),
            Lsr => self.shift(inst, ShiftOp::Lsr),
            Asr => self.shift(inst, ShiftOp::Asr),
            Ror => self.shift(inst, ShiftOp::Ror),
            Mov | Movz => self.mov(inst),
            Movn => self.movn(inst),
            Movk => self.movk(inst),
            Adr => self.adr(inst, false),
            Adrp => self.adr(inst, true),
            Ldr => self.load_ext(inst, None, false),
            Ldrb => self.load_ext(inst, Some(Type::I8), false),
            Ldrsb => self.load_ext(inst, Some(Type::I8), true),
            Ldrh => self.load_ext(inst, Some(Type::I16), false),
            Ldrsh => self.load_ext(inst, Some(Type::I16), true),
            Ldrsw => self.load_ext(inst, Some(Type::I32), true),
            Str => self.store_trunc(inst, None),
            Strb => self.store_trunc(inst, Some(Type::I8)),
            Strh => self.store_trunc(inst, Some(Type::I16)),
            Ldp => self.load_pair(inst, false),
            Ldpsw => self.load_pair(inst, true),
            Stp => self.store_pair(inst),
            B => self.branch(inst),
            Cbz => self.cbz(inst, CmpPred::Eq),
            Cbnz => self.cbz(inst, CmpPred::Ne),
            Tbz => self.tbz(inst, CmpPred::Eq),
            Tbnz => self.tbz(inst, CmpPred::Ne),
            Bl => self.bl(inst),
            Blr => self.blr(inst),
            Br => self.br_reg(inst),
            Ret => {
                self.b.ret(None);
                Ok(())
            }
            Csel => self.csel(inst, false),
            Csinc => self.csel(inst, true),
            Cset => self.cset(inst, false),
            Csetm => self.cset(inst, true),
            Nop => Ok(()),
            Brk | Dmb | Svc => {
                self.opaque(inst);
                Ok(())
            }
        }
    }

    // ---- register and flag access ------------------------------------

    fn reg_ty(&self, reg: Reg) -> Type {
        let bank = self.abi.bank();
        crate::regs::global_type(bank.class(reg), bank.bits(reg))
    }

    /// Reads `reg` at its own width: load the parent, truncate if this is a
    /// sub-register.
    fn read_reg(&mut self, reg: Reg) -> ValueId {
        let gv = self.regs.global(self.abi, reg);
        let addr = self.b.global_addr(gv);
        let full = self.b.load(addr);
        let ty = self.reg_ty(reg);
        if self.b.value_ty(full) == ty {
            full
        } else {
            self.b.trunc(full, ty)
        }
    }

    /// Writes `reg`; sub-register writes zero-extend into the parent.
    fn write_reg(&mut self, reg: Reg, value: ValueId) {
        let gv = self.regs.global(self.abi, reg);
        let full_ty = self.b.module.globals.ty(gv);
        let v = if self.b.value_ty(value) == full_ty {
            value
        } else {
            self.b.zext(value, full_ty)
        };
        let addr = self.b.global_addr(gv);
        self.b.store(v, addr);
    }

    fn flag_gv(&self, flag: Flag) -> relift_ir::GlobalId {
        let reg = self.abi.flag(flag).expect("abi has no flag registers");
        self.regs.global(self.abi, reg)
    }

    fn read_flag(&mut self, flag: Flag) -> ValueId {
        let gv = self.flag_gv(flag);
        let addr = self.b.global_addr(gv);
        self.b.load(addr)
    }

    fn write_flag(&mut self, flag: Flag, value: ValueId) {
        let gv = self.flag_gv(flag);
        let addr = self.b.global_addr(gv);
        self.b.store(value, addr);
    }

    // ---- operand evaluation ------------------------------------------

    fn reg_op(inst: &MachInst, idx: usize) -> Result<Reg, Malformed> {
        match inst.operands.get(idx) {
            Some(Operand::Reg(reg)) => Ok(*reg),
            _ => Err(Malformed("expected register operand")),
        }
    }

    fn label_op(inst: &MachInst, idx: usize) -> Result<u64, Malformed> {
        match inst.operands.get(idx) {
            Some(Operand::Label(addr)) => Ok(*addr),
            Some(Operand::Imm(imm)) => Ok(*imm as u64),
            _ => Err(Malformed("expected label operand")),
        }
    }

    fn imm_op(inst: &MachInst, idx: usize) -> Result<i64, Malformed> {
        match inst.operands.get(idx) {
            Some(Operand::Imm(imm)) => Ok(*imm),
            _ => Err(Malformed("expected immediate operand")),
        }
    }

    /// Width of the operation, taken from the destination register.
    fn dest_ty(&self, reg: Reg) -> Type {
        self.reg_ty(reg)
    }

    /// Adjusts `v` to `ty` by truncation or zero-extension.
    fn coerce(&mut self, v: ValueId, ty: Type) -> ValueId {
        let have = self.b.value_ty(v);
        if have == ty {
            v
        } else if have.bits() > ty.bits() {
            self.b.trunc(v, ty)
        } else {
            self.b.zext(v, ty)
        }
    }

    /// Evaluates a source operand at width `ty`, applying shift and
    /// extension modifiers.
    fn value_of(&mut self, op: &Operand, ty: Type) -> Result<ValueId, Malformed> {
        match op {
            Operand::Reg(reg) => {
                let v = self.read_reg(*reg);
                Ok(self.coerce(v, ty))
            }
            Operand::Imm(imm) => Ok(self.b.imm(Imm::int_of(ty, *imm as i128))),
            Operand::ShiftedImm { imm, shift } => {
                Ok(self.b.imm(Imm::int_of(ty, (*imm as i128) << shift)))
            }
            Operand::ShiftedReg { reg, op, amount } => {
                let v = self.read_reg(*reg);
                let v = self.coerce(v, ty);
                let masked = u32::from(*amount) & (u32::from(ty.bits()) - 1);
                let amount = self.b.imm(Imm::int_of(ty, masked as i128));
                Ok(self.emit_shift(*op, v, amount, ty))
            }
            Operand::ExtReg { reg, extend, shift } => {
                let v = self.read_reg(*reg);
                let v = self.apply_extend(v, *extend, ty);
                if *shift > 0 {
                    let amount = self.b.imm(Imm::int_of(ty, *shift as i128));
                    Ok(self.b.binary(BinaryOp::Shl, v, amount))
                } else {
                    Ok(v)
                }
            }
            Operand::Mem(_) | Operand::Label(_) => Err(Malformed("unexpected operand kind")),
        }
    }

    /// Truncate to the extension's source width, then extend to `ty`.
    fn apply_extend(&mut self, v: ValueId, extend: Extend, ty: Type) -> ValueId {
        let src_ty = Type::int(extend.src_bits()).unwrap();
        let mut v = v;
        if self.b.value_ty(v).bits() > src_ty.bits() {
            v = self.b.trunc(v, src_ty);
        }
        if self.b.value_ty(v).bits() == ty.bits() {
            return v;
        }
        if extend.is_signed() {
            self.b.sext(v, ty)
        } else {
            self.b.zext(v, ty)
        }
    }

    fn emit_shift(&mut self, op: ShiftOp, v: ValueId, amount: ValueId, ty: Type) -> ValueId {
        match op {
            ShiftOp::Lsl => self.b.binary(BinaryOp::Shl, v, amount),
            ShiftOp::Lsr => self.b.binary(BinaryOp::Lshr, v, amount),
            ShiftOp::Asr => self.b.binary(BinaryOp::Ashr, v, amount),
            ShiftOp::Ror => {
                // ror(v, n) == (v >> n) | (v << ((-n) & (W-1)))
                let mask = self.b.imm(Imm::int_of(ty, i128::from(ty.bits()) - 1));
                let lo = self.b.binary(BinaryOp::Lshr, v, amount);
                let negated = self.b.unary(UnaryOp::Neg, amount);
                let inv = self.b.binary(BinaryOp::And, negated, mask);
                let hi = self.b.binary(BinaryOp::Shl, v, inv);
                self.b.binary(BinaryOp::Or, lo, hi)
            }
        }
    }

    // ---- flags --------------------------------------------------------

    /// `a + b + carry_in`, with carry-out and signed overflow when
    /// `want_flags`.
    fn add_with_carry(
        &mut self,
        a: ValueId,
        b_val: ValueId,
        carry_in: ValueId,
        ty: Type,
        want_flags: bool,
    ) -> (ValueId, Option<(ValueId, ValueId)>) {
        let cin = if self.b.value_ty(carry_in) == ty {
            carry_in
        } else {
            self.b.zext(carry_in, ty)
        };
        let s1 = self.b.binary(BinaryOp::Add, a, b_val);
        let sum = self.b.binary(BinaryOp::Add, s1, cin);
        if !want_flags {
            return (sum, None);
        }
        let c1 = self.b.icmp(CmpPred::Ult, s1, a);
        let c2 = self.b.icmp(CmpPred::Ult, sum, s1);
        let carry = self.b.binary(BinaryOp::Or, c1, c2);

        let xa = self.b.binary(BinaryOp::Xor, sum, a);
        let xb = self.b.binary(BinaryOp::Xor, sum, b_val);
        let m = self.b.binary(BinaryOp::And, xa, xb);
        let zero = self.b.imm(Imm::int_of(ty, 0));
        let overflow = self.b.icmp(CmpPred::Slt, m, zero);
        (sum, Some((carry, overflow)))
    }

    fn set_nz(&mut self, result: ValueId, ty: Type) {
        let zero = self.b.imm(Imm::int_of(ty, 0));
        let n = self.b.icmp(CmpPred::Slt, result, zero);
        let z = self.b.icmp(CmpPred::Eq, result, zero);
        self.write_flag(Flag::N, n);
        self.write_flag(Flag::Z, z);
    }

    fn set_nzcv(&mut self, result: ValueId, ty: Type, carry: ValueId, overflow: ValueId) {
        self.set_nz(result, ty);
        self.write_flag(Flag::C, carry);
        self.write_flag(Flag::V, overflow);
    }

    fn cond_value(&mut self, cond: Cond) -> ValueId {
        match cond {
            Cond::Eq => self.read_flag(Flag::Z),
            Cond::Ne => {
                let z = self.read_flag(Flag::Z);
                self.b.unary(UnaryOp::Not, z)
            }
            Cond::Hs => self.read_flag(Flag::C),
            Cond::Lo => {
                let c = self.read_flag(Flag::C);
                self.b.unary(UnaryOp::Not, c)
            }
            Cond::Mi => self.read_flag(Flag::N),
            Cond::Pl => {
                let n = self.read_flag(Flag::N);
                self.b.unary(UnaryOp::Not, n)
            }
            Cond::Vs => self.read_flag(Flag::V),
            Cond::Vc => {
                let v = self.read_flag(Flag::V);
                self.b.unary(UnaryOp::Not, v)
            }
            Cond::Hi => {
                let c = self.read_flag(Flag::C);
                let z = self.read_flag(Flag::Z);
                let nz = self.b.unary(UnaryOp::Not, z);
                self.b.binary(BinaryOp::And, c, nz)
            }
            Cond::Ls => {
                let c = self.read_flag(Flag::C);
                let nc = self.b.unary(UnaryOp::Not, c);
                let z = self.read_flag(Flag::Z);
                self.b.binary(BinaryOp::Or, nc, z)
            }
            Cond::Ge => {
                let n = self.read_flag(Flag::N);
                let v = self.read_flag(Flag::V);
                self.b.icmp(CmpPred::Eq, n, v)
            }
            Cond::Lt => {
                let n = self.read_flag(Flag::N);
                let v = self.read_flag(Flag::V);
                self.b.icmp(CmpPred::Ne, n, v)
            }
            Cond::Gt => {
                let z = self.read_flag(Flag::Z);
                let nz = self.b.unary(UnaryOp::Not, z);
                let n = self.read_flag(Flag::N);
                let v = self.read_flag(Flag::V);
                let ge = self.b.icmp(CmpPred::Eq, n, v);
                self.b.binary(BinaryOp::And, nz, ge)
            }
            Cond::Le => {
                let z = self.read_flag(Flag::Z);
                let n = self.read_flag(Flag::N);
                let v = self.read_flag(Flag::V);
                let lt = self.b.icmp(CmpPred::Ne, n, v);
                self.b.binary(BinaryOp::Or, z, lt)
            }
            Cond::Al => self.b.imm(true),
        }
    }

    // ---- data processing ----------------------------------------------

    fn adc_like(&mut self, inst: &MachInst, subtract: bool) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let a = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let b_val = self.value_of(inst.operands.get(2).ok_or(Malformed("missing operand"))?, ty)?;
        let b_val = if subtract {
            self.b.unary(UnaryOp::Not, b_val)
        } else {
            b_val
        };
        let cin = self.read_flag(Flag::C);
        let (sum, flags) = self.add_with_carry(a, b_val, cin, ty, inst.set_flags);
        if let Some((c, v)) = flags {
            self.set_nzcv(sum, ty, c, v);
        }
        self.write_reg(rd, sum);
        Ok(())
    }

    fn add_sub(&mut self, inst: &MachInst, subtract: bool) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let a = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let b_val = self.value_of(inst.operands.get(2).ok_or(Malformed("missing operand"))?, ty)?;

        let result = if inst.set_flags {
            let (b_eff, cin) = if subtract {
                let not_b = self.b.unary(UnaryOp::Not, b_val);
                (not_b, self.b.imm(true))
            } else {
                (b_val, self.b.imm(false))
            };
            let (sum, flags) = self.add_with_carry(a, b_eff, cin, ty, true);
            let (c, v) = flags.unwrap();
            self.set_nzcv(sum, ty, c, v);
            sum
        } else if subtract {
            self.b.binary(BinaryOp::Sub, a, b_val)
        } else {
            self.b.binary(BinaryOp::Add, a, b_val)
        };
        self.write_reg(rd, result);
        Ok(())
    }

    /// `cmp`/`cmn`: flag-setting subtract/add without a destination.
    fn compare(&mut self, inst: &MachInst, subtract: bool) -> Result<(), Malformed> {
        let rn = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rn);
        let a = self.read_reg(rn);
        let a = self.coerce(a, ty);
        let b_val = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let (b_eff, cin) = if subtract {
            let not_b = self.b.unary(UnaryOp::Not, b_val);
            (not_b, self.b.imm(true))
        } else {
            (b_val, self.b.imm(false))
        };
        let (sum, flags) = self.add_with_carry(a, b_eff, cin, ty, true);
        let (c, v) = flags.unwrap();
        self.set_nzcv(sum, ty, c, v);
        Ok(())
    }

    fn neg(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let b_val = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let result = if inst.set_flags {
            let zero = self.b.imm(Imm::int_of(ty, 0));
            let not_b = self.b.unary(UnaryOp::Not, b_val);
            let one = self.b.imm(true);
            let (sum, flags) = self.add_with_carry(zero, not_b, one, ty, true);
            let (c, v) = flags.unwrap();
            self.set_nzcv(sum, ty, c, v);
            sum
        } else {
            self.b.unary(UnaryOp::Neg, b_val)
        };
        self.write_reg(rd, result);
        Ok(())
    }

    /// Bitwise ops. On AArch64 the flag-setting forms update N and Z only.
    fn logical(&mut self, inst: &MachInst, op: BinaryOp, discard: bool) -> Result<(), Malformed> {
        let (first, ty) = if discard {
            let rn = Self::reg_op(inst, 0)?;
            (None, self.dest_ty(rn))
        } else {
            let rd = Self::reg_op(inst, 0)?;
            (Some(rd), self.dest_ty(rd))
        };
        let src_base = if discard { 0 } else { 1 };
        let a = self.value_of(
            inst.operands.get(src_base).ok_or(Malformed("missing operand"))?,
            ty,
        )?;
        let b_val = self.value_of(
            inst.operands
                .get(src_base + 1)
                .ok_or(Malformed("missing operand"))?,
            ty,
        )?;
        let result = self.b.binary(op, a, b_val);
        if inst.set_flags || discard {
            self.set_nz(result, ty);
        }
        if let Some(rd) = first {
            self.write_reg(rd, result);
        }
        Ok(())
    }

    fn mvn(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let v = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let result = self.b.unary(UnaryOp::Not, v);
        self.write_reg(rd, result);
        Ok(())
    }

    fn multiply(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let rn = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let rm = self.value_of(inst.operands.get(2).ok_or(Malformed("missing operand"))?, ty)?;
        let product = self.b.binary(BinaryOp::Mul, rn, rm);
        let result = match inst.mnemonic {
            Mnemonic::Mul => product,
            Mnemonic::Mneg => self.b.unary(UnaryOp::Neg, product),
            Mnemonic::Madd => {
                let ra = self.value_of(
                    inst.operands.get(3).ok_or(Malformed("missing operand"))?,
                    ty,
                )?;
                self.b.binary(BinaryOp::Add, ra, product)
            }
            Mnemonic::Msub => {
                let ra = self.value_of(
                    inst.operands.get(3).ok_or(Malformed("missing operand"))?,
                    ty,
                )?;
                self.b.binary(BinaryOp::Sub, ra, product)
            }
            _ => unreachable!(),
        };
        self.write_reg(rd, result);
        Ok(())
    }

    fn shift(&mut self, inst: &MachInst, op: ShiftOp) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let v = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        // The shift amount is masked to log2(W) bits, as the hardware does.
        let mask = i128::from(ty.bits()) - 1;
        let amount = match inst.operands.get(2) {
            Some(Operand::Imm(imm)) => self.b.imm(Imm::int_of(ty, (*imm as i128) & mask)),
            Some(Operand::Reg(reg)) => {
                let raw = self.read_reg(*reg);
                let raw = self.coerce(raw, ty);
                let mask = self.b.imm(Imm::int_of(ty, mask));
                self.b.binary(BinaryOp::And, raw, mask)
            }
            _ => return Err(Malformed("expected shift amount")),
        };
        let result = self.emit_shift(op, v, amount, ty);
        self.write_reg(rd, result);
        Ok(())
    }

    fn mov(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let v = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        self.write_reg(rd, v);
        Ok(())
    }

    fn movn(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let (imm, shift) = match inst.operands.get(1) {
            Some(Operand::Imm(imm)) => (*imm, 0u8),
            Some(Operand::ShiftedImm { imm, shift }) => (*imm, *shift),
            _ => return Err(Malformed("expected immediate operand")),
        };
        let value = !((imm as i128) << shift);
        let v = self.b.imm(Imm::int_of(ty, value));
        self.write_reg(rd, v);
        Ok(())
    }

    fn movk(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let (imm, shift) = match inst.operands.get(1) {
            Some(Operand::Imm(imm)) => (*imm, 0u8),
            Some(Operand::ShiftedImm { imm, shift }) => (*imm, *shift),
            _ => return Err(Malformed("expected immediate operand")),
        };
        let old = self.read_reg(rd);
        let hole = self.b.imm(Imm::int_of(ty, !(0xffffi128 << shift)));
        let masked = self.b.binary(BinaryOp::And, old, hole);
        let bits = self.b.imm(Imm::int_of(ty, (imm as i128 & 0xffff) << shift));
        let result = self.b.binary(BinaryOp::Or, masked, bits);
        self.write_reg(rd, result);
        Ok(())
    }

    fn adr(&mut self, inst: &MachInst, page: bool) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let target = match inst.operands.get(1) {
            // Raw offset: resolve against this instruction's address.
            Some(Operand::Imm(imm)) => {
                if page {
                    ((inst.address & !0xfff) as i64).wrapping_add(imm << 12) as u64
                } else {
                    (inst.address as i64).wrapping_add(*imm) as u64
                }
            }
            Some(Operand::Label(addr)) => *addr,
            _ => return Err(Malformed("expected address operand")),
        };
        let v = self.b.imm(Imm::I64(target as i64));
        self.write_reg(rd, v);
        Ok(())
    }

    // ---- memory -------------------------------------------------------

    /// Effective address of a memory operand. Pre-indexed forms write the
    /// base back before the access; post-indexed updates are returned for
    /// the caller to apply after it.
    fn mem_operand(
        &mut self,
        mem: &MemOperand,
    ) -> Result<(ValueId, Option<PostWb>), Malformed> {
        if self.abi.bank().bits(mem.base) != 64 {
            return Err(Malformed("memory base must be a 64-bit register"));
        }
        let base = self.read_reg(mem.base);

        let offset = if let Some(index) = &mem.index {
            let v = self.read_reg(index.reg);
            let v = match index.extend {
                Some(extend) => self.apply_extend(v, extend, Type::I64),
                None => self.coerce(v, Type::I64),
            };
            let v = if index.shift > 0 {
                let amount = self.b.imm(Imm::I64(i64::from(index.shift)));
                self.b.binary(BinaryOp::Shl, v, amount)
            } else {
                v
            };
            Some(v)
        } else if mem.disp != 0 {
            Some(self.b.imm(Imm::I64(mem.disp)))
        } else {
            None
        };

        match mem.writeback {
            Writeback::None => {
                let addr = match offset {
                    Some(off) => self.b.binary(BinaryOp::Add, base, off),
                    None => base,
                };
                Ok((addr, None))
            }
            Writeback::Pre => {
                let off = offset.unwrap_or_else(|| self.b.imm(Imm::I64(0)));
                let addr = self.b.binary(BinaryOp::Add, base, off);
                self.write_reg(mem.base, addr);
                Ok((addr, None))
            }
            Writeback::Post => Ok((
                base,
                Some(PostWb {
                    reg: mem.base,
                    base,
                    disp: mem.disp,
                }),
            )),
        }
    }

    fn apply_writeback(&mut self, wb: Option<PostWb>) {
        if let Some(wb) = wb {
            let off = self.b.imm(Imm::I64(wb.disp));
            let new = self.b.binary(BinaryOp::Add, wb.base, off);
            self.write_reg(wb.reg, new);
        }
    }

    fn address_operand(
        &mut self,
        inst: &MachInst,
        idx: usize,
    ) -> Result<(ValueId, Option<PostWb>), Malformed> {
        match inst.operands.get(idx) {
            Some(Operand::Mem(mem)) => {
                let mem = *mem;
                self.mem_operand(&mem)
            }
            Some(Operand::Label(addr)) => Ok((self.b.imm(Imm::I64(*addr as i64)), None)),
            _ => Err(Malformed("expected memory operand")),
        }
    }

    fn emit_load(&mut self, addr: ValueId, elem: Type) -> ValueId {
        let ptr = self.b.bitcast(addr, elem.ptr_to());
        self.b.load(ptr)
    }

    fn emit_store(&mut self, value: ValueId, addr: ValueId) {
        let ty = self.b.value_ty(value);
        let ptr = self.b.bitcast(addr, ty.ptr_to());
        self.b.store(value, ptr);
    }

    fn load_ext(
        &mut self,
        inst: &MachInst,
        elem: Option<Type>,
        signed: bool,
    ) -> Result<(), Malformed> {
        let rt = Self::reg_op(inst, 0)?;
        let dst_ty = self.dest_ty(rt);
        let elem = elem.unwrap_or(dst_ty);
        let (addr, wb) = self.address_operand(inst, 1)?;
        let raw = self.emit_load(addr, elem);
        let v = if elem == dst_ty {
            raw
        } else if signed {
            self.b.sext(raw, dst_ty)
        } else {
            self.b.zext(raw, dst_ty)
        };
        self.write_reg(rt, v);
        self.apply_writeback(wb);
        Ok(())
    }

    fn store_trunc(&mut self, inst: &MachInst, elem: Option<Type>) -> Result<(), Malformed> {
        let rt = Self::reg_op(inst, 0)?;
        let v = self.read_reg(rt);
        let v = match elem {
            Some(narrow) => self.coerce(v, narrow),
            None => v,
        };
        let (addr, wb) = self.address_operand(inst, 1)?;
        self.emit_store(v, addr);
        self.apply_writeback(wb);
        Ok(())
    }

    fn load_pair(&mut self, inst: &MachInst, sext_word: bool) -> Result<(), Malformed> {
        let rt1 = Self::reg_op(inst, 0)?;
        let rt2 = Self::reg_op(inst, 1)?;
        let dst_ty = if sext_word { Type::I64 } else { self.dest_ty(rt1) };
        let elem = if sext_word { Type::I32 } else { dst_ty };
        let (addr, wb) = self.address_operand(inst, 2)?;

        let v1 = self.emit_load(addr, elem);
        let v1 = if sext_word { self.b.sext(v1, dst_ty) } else { v1 };
        self.write_reg(rt1, v1);

        let size = self.b.imm(Imm::I64(i64::from(elem.bytes())));
        let addr2 = self.b.binary(BinaryOp::Add, addr, size);
        let v2 = self.emit_load(addr2, elem);
        let v2 = if sext_word { self.b.sext(v2, dst_ty) } else { v2 };
        self.write_reg(rt2, v2);

        self.apply_writeback(wb);
        Ok(())
    }

    fn store_pair(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rt1 = Self::reg_op(inst, 0)?;
        let rt2 = Self::reg_op(inst, 1)?;
        let (addr, wb) = self.address_operand(inst, 2)?;

        let v1 = self.read_reg(rt1);
        self.emit_store(v1, addr);

        let elem_bytes = i64::from(self.b.value_ty(v1).bytes());
        let size = self.b.imm(Imm::I64(elem_bytes));
        let addr2 = self.b.binary(BinaryOp::Add, addr, size);
        let v2 = self.read_reg(rt2);
        self.emit_store(v2, addr2);

        self.apply_writeback(wb);
        Ok(())
    }

    // ---- control flow -------------------------------------------------

    fn fallthrough(&mut self, address: u64) -> BlockId {
        let next = address + 4;
        if let Some(&block) = self.blocks.get(&next) {
            block
        } else {
            let block = self.b.append_block();
            self.blocks.insert(next, block);
            block
        }
    }

    fn branch(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let target = Self::label_op(inst, 0)?;
        match inst.cond {
            None | Some(Cond::Al) => {
                if let Some(&block) = self.blocks.get(&target) {
                    self.b.jump(block);
                } else {
                    let t = self.b.imm(Imm::I64(target as i64));
                    self.b.intrinsic("branch", &[t], Type::Void);
                    self.b.ret(None);
                }
            }
            Some(cond) => {
                let cond_v = self.cond_value(cond);
                let fall = self.fallthrough(inst.address);
                if let Some(&block) = self.blocks.get(&target) {
                    self.b.br(cond_v, block, fall);
                } else {
                    let t = self.b.imm(Imm::I64(target as i64));
                    self.b.intrinsic("cond_branch", &[cond_v, t], Type::Void);
                    self.b.jump(fall);
                }
            }
        }
        Ok(())
    }

    fn cbz(&mut self, inst: &MachInst, pred: CmpPred) -> Result<(), Malformed> {
        let rn = Self::reg_op(inst, 0)?;
        let target = Self::label_op(inst, 1)?;
        let ty = self.dest_ty(rn);
        let v = self.read_reg(rn);
        let zero = self.b.imm(Imm::int_of(ty, 0));
        let cond = self.b.icmp(pred, v, zero);
        self.cond_branch_to(inst, cond, target);
        Ok(())
    }

    fn tbz(&mut self, inst: &MachInst, pred: CmpPred) -> Result<(), Malformed> {
        let rn = Self::reg_op(inst, 0)?;
        let bit = Self::imm_op(inst, 1)?;
        let target = Self::label_op(inst, 2)?;
        let ty = self.dest_ty(rn);
        let v = self.read_reg(rn);
        let mask = self.b.imm(Imm::int_of(ty, 1i128 << (bit as u32)));
        let test = self.b.binary(BinaryOp::And, v, mask);
        let zero = self.b.imm(Imm::int_of(ty, 0));
        let cond = self.b.icmp(pred, test, zero);
        self.cond_branch_to(inst, cond, target);
        Ok(())
    }

    fn cond_branch_to(&mut self, inst: &MachInst, cond: ValueId, target: u64) {
        let fall = self.fallthrough(inst.address);
        if let Some(&block) = self.blocks.get(&target) {
            self.b.br(cond, block, fall);
        } else {
            let t = self.b.imm(Imm::I64(target as i64));
            self.b.intrinsic("cond_branch", &[cond, t], Type::Void);
            self.b.jump(fall);
        }
    }

    fn write_link_register(&mut self, inst: &MachInst) {
        let lr = self.abi.link_register().expect("aarch64 has a link register");
        let ret_addr = self.b.imm(Imm::I64((inst.address + 4) as i64));
        self.write_reg(lr, ret_addr);
    }

    fn bl(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let target = Self::label_op(inst, 0)?;
        self.write_link_register(inst);
        if let Some(&func) = self.symbols.get(&target) {
            self.b.call(CallTarget::Direct(func), &[], Type::Void);
        } else {
            let t = self.b.imm(Imm::I64(target as i64));
            let ptr = self.b.bitcast(t, Type::I8.ptr_to());
            self.b.call(CallTarget::Indirect(ptr), &[], Type::Void);
        }
        Ok(())
    }

    fn blr(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rn = Self::reg_op(inst, 0)?;
        let target = self.read_reg(rn);
        self.write_link_register(inst);
        let ptr = self.b.bitcast(target, Type::I8.ptr_to());
        self.b.call(CallTarget::Indirect(ptr), &[], Type::Void);
        Ok(())
    }

    /// An indirect branch leaves the function.
    fn br_reg(&mut self, inst: &MachInst) -> Result<(), Malformed> {
        let rn = Self::reg_op(inst, 0)?;
        let target = self.read_reg(rn);
        self.b.intrinsic("branch", &[target], Type::Void);
        self.b.ret(None);
        Ok(())
    }

    fn csel(&mut self, inst: &MachInst, increment: bool) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let cond = inst.cond.ok_or(Malformed("missing condition"))?;
        let a = self.value_of(inst.operands.get(1).ok_or(Malformed("missing operand"))?, ty)?;
        let b_val = self.value_of(inst.operands.get(2).ok_or(Malformed("missing operand"))?, ty)?;
        let b_val = if increment {
            let one = self.b.imm(Imm::int_of(ty, 1));
            self.b.binary(BinaryOp::Add, b_val, one)
        } else {
            b_val
        };
        let cond_v = self.cond_value(cond);
        let result = self.b.select(cond_v, a, b_val);
        self.write_reg(rd, result);
        Ok(())
    }

    fn cset(&mut self, inst: &MachInst, all_ones: bool) -> Result<(), Malformed> {
        let rd = Self::reg_op(inst, 0)?;
        let ty = self.dest_ty(rd);
        let cond = inst.cond.ok_or(Malformed("missing condition"))?;
        let cond_v = self.cond_value(cond);
        let then_val = if all_ones {
            self.b.imm(Imm::int_of(ty, -1))
        } else {
            self.b.imm(Imm::int_of(ty, 1))
        };
        let else_val = self.b.imm(Imm::int_of(ty, 0));
        let result = self.b.select(cond_v, then_val, else_val);
        self.write_reg(rd, result);
        Ok(())
    }

    /// Unknown or untranslated opcode: an opaque intrinsic preserving the
    /// observed register reads and the written destination.
    fn opaque(&mut self, inst: &MachInst) {
        let name = format!("asm_{}", inst.mnemonic.as_str());
        let mut regs = inst.operands.iter().filter_map(|op| match op {
            Operand::Reg(reg) => Some(*reg),
            _ => None,
        });
        let dest = regs.next();
        let mut args = Vec::new();
        for reg in regs {
            args.push(self.read_reg(reg));
        }
        for op in &inst.operands {
            if let Operand::Imm(imm) = op {
                args.push(self.b.imm(Imm::I64(*imm)));
            }
        }
        match dest {
            Some(rd) => {
                let ty = self.dest_ty(rd);
                let result = self.b.intrinsic(&name, &args, ty).unwrap();
                self.write_reg(rd, result);
            }
            None => {
                self.b.intrinsic(&name, &args, Type::Void);
            }
        }
    }
}
