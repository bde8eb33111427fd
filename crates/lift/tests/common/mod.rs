//! A small concrete evaluator over the IR, used to check lifted semantics
//! against architectural reference values.

use rustc_hash::FxHashMap;
use relift_ir::{
    inst::{BinaryOp, CallTarget, CastOp, CmpPred, InstData, UnaryOp},
    BlockId, FuncRef, GlobalId, Module, Type, Value, ValueId,
};

/// Global locations live at synthetic addresses so loads through pointer
/// values can find them.
const GLOBAL_BASE: u64 = 0xffff_0000_0000_0000;
const ALLOCA_BASE: u64 = 0x7fff_0000_0000_0000;

fn mask(bits: u16) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

fn sign_extend(v: u128, bits: u16) -> i128 {
    if bits >= 128 {
        return v as i128;
    }
    let shift = 128 - bits as u32;
    ((v << shift) as i128) >> shift
}

pub struct Machine<'a> {
    module: &'a Module,
    globals: FxHashMap<GlobalId, u128>,
    mem: FxHashMap<u64, u8>,
    /// Names of called functions / intrinsics, with argument values.
    pub calls: Vec<(String, Vec<u128>)>,
}

impl<'a> Machine<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self {
            module,
            globals: FxHashMap::default(),
            mem: FxHashMap::default(),
            calls: Vec::new(),
        }
    }

    fn global_by_name(&self, name: &str) -> GlobalId {
        self.module
            .globals
            .by_name(name)
            .unwrap_or_else(|| panic!("no global `{name}`"))
    }

    pub fn set_reg(&mut self, name: &str, value: u64) {
        let gv = self.global_by_name(name);
        self.globals.insert(gv, value as u128);
    }

    pub fn reg(&self, name: &str) -> u64 {
        let gv = self.global_by_name(name);
        *self.globals.get(&gv).unwrap_or(&0) as u64
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.set_reg(name, value as u64);
    }

    pub fn flag(&self, name: &str) -> bool {
        self.reg(name) != 0
    }

    pub fn write_mem(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    pub fn read_mem_u64(&self, addr: u64) -> u64 {
        let mut v = 0u64;
        for i in (0..8).rev() {
            v = (v << 8) | u64::from(*self.mem.get(&(addr + i)).unwrap_or(&0));
        }
        v
    }

    fn load_bytes(&self, addr: u64, bytes: usize) -> u128 {
        let mut v = 0u128;
        for i in (0..bytes).rev() {
            v = (v << 8) | u128::from(*self.mem.get(&(addr + i as u64)).unwrap_or(&0));
        }
        v
    }

    fn store_bytes(&mut self, addr: u64, bytes: usize, value: u128) {
        for i in 0..bytes {
            self.mem.insert(addr + i as u64, (value >> (8 * i)) as u8);
        }
    }

    fn load_loc(&self, addr: u64, ty: Type) -> u128 {
        if addr >= GLOBAL_BASE {
            let gv = GlobalId(((addr - GLOBAL_BASE) / 16) as u32);
            *self.globals.get(&gv).unwrap_or(&0)
        } else {
            self.load_bytes(addr, ty.bytes() as usize)
        }
    }

    fn store_loc(&mut self, addr: u64, ty: Type, value: u128) {
        if addr >= GLOBAL_BASE {
            let gv = GlobalId(((addr - GLOBAL_BASE) / 16) as u32);
            self.globals.insert(gv, value & mask(ty.bits()));
        } else {
            self.store_bytes(addr, ty.bytes() as usize, value);
        }
    }

    /// Runs `func` from its entry block to the first `ret`; returns the
    /// returned value, if any.
    pub fn run(&mut self, func_ref: FuncRef) -> Option<u128> {
        let func = &self.module.funcs[func_ref];
        let mut values: FxHashMap<ValueId, u128> = FxHashMap::default();
        let mut block = func.entry_block().expect("function has no entry");
        let mut steps = 0usize;

        loop {
            let mut next: Option<BlockId> = None;
            for inst in func.layout.iter_inst(block) {
                steps += 1;
                assert!(steps < 1_000_000, "evaluation did not terminate");

                let val = |values: &FxHashMap<ValueId, u128>, v: ValueId| -> u128 {
                    match func.dfg.value(v) {
                        Value::Imm { imm, ty } => (imm.as_i128() as u128) & mask(ty.bits()),
                        Value::Global { gv, .. } => GLOBAL_BASE as u128 + gv.0 as u128 * 16,
                        Value::Arg { .. } => panic!("niladic functions only"),
                        Value::Inst { .. } => *values
                            .get(&v)
                            .unwrap_or_else(|| panic!("use of unevaluated {v:?}")),
                    }
                };

                match func.dfg.inst(inst) {
                    InstData::Alloca { .. } => {
                        values.insert(
                            func.dfg.inst_result(inst).unwrap(),
                            ALLOCA_BASE as u128 + inst.0 as u128 * 64,
                        );
                    }
                    InstData::Load { addr, ty } => {
                        let a = val(&values, *addr) as u64;
                        let v = self.load_loc(a, *ty) & mask(ty.bits());
                        values.insert(func.dfg.inst_result(inst).unwrap(), v);
                    }
                    InstData::Store { value, addr } => {
                        let ty = func.dfg.value_ty(*value);
                        let a = val(&values, *addr) as u64;
                        let v = val(&values, *value);
                        self.store_loc(a, ty, v);
                    }
                    InstData::Bitcast { value, .. } => {
                        let v = val(&values, *value);
                        values.insert(func.dfg.inst_result(inst).unwrap(), v);
                    }
                    InstData::Cast { op, value, ty } => {
                        let src_ty = func.dfg.value_ty(*value);
                        let v = val(&values, *value);
                        let out = match op {
                            CastOp::Zext => v & mask(src_ty.bits()),
                            CastOp::Sext => {
                                (sign_extend(v, src_ty.bits()) as u128) & mask(ty.bits())
                            }
                            CastOp::Trunc => v & mask(ty.bits()),
                        };
                        values.insert(func.dfg.inst_result(inst).unwrap(), out);
                    }
                    InstData::Binary { op, args } => {
                        let ty = func.dfg.value_ty(args[0]);
                        let bits = ty.bits();
                        let a = val(&values, args[0]) & mask(bits);
                        let b = val(&values, args[1]) & mask(bits);
                        let out = match op {
                            BinaryOp::Add => a.wrapping_add(b),
                            BinaryOp::Sub => a.wrapping_sub(b),
                            BinaryOp::Mul => a.wrapping_mul(b),
                            BinaryOp::And => a & b,
                            BinaryOp::Or => a | b,
                            BinaryOp::Xor => a ^ b,
                            BinaryOp::Shl => {
                                if b >= u128::from(bits) {
                                    0
                                } else {
                                    a << b
                                }
                            }
                            BinaryOp::Lshr => {
                                if b >= u128::from(bits) {
                                    0
                                } else {
                                    a >> b
                                }
                            }
                            BinaryOp::Ashr => {
                                let sa = sign_extend(a, bits);
                                let amt = b.min(127) as u32;
                                (sa >> amt) as u128
                            }
                        } & mask(bits);
                        values.insert(func.dfg.inst_result(inst).unwrap(), out);
                    }
                    InstData::Unary { op, arg } => {
                        let ty = func.dfg.value_ty(*arg);
                        let bits = ty.bits();
                        let a = val(&values, *arg) & mask(bits);
                        let out = match op {
                            UnaryOp::Neg => a.wrapping_neg(),
                            UnaryOp::Not => !a,
                        } & mask(bits);
                        values.insert(func.dfg.inst_result(inst).unwrap(), out);
                    }
                    InstData::Icmp { pred, args } => {
                        let ty = func.dfg.value_ty(args[0]);
                        let bits = ty.bits();
                        let a = val(&values, args[0]) & mask(bits);
                        let b = val(&values, args[1]) & mask(bits);
                        let sa = sign_extend(a, bits);
                        let sb = sign_extend(b, bits);
                        let out = match pred {
                            CmpPred::Eq => a == b,
                            CmpPred::Ne => a != b,
                            CmpPred::Ult => a < b,
                            CmpPred::Ule => a <= b,
                            CmpPred::Ugt => a > b,
                            CmpPred::Uge => a >= b,
                            CmpPred::Slt => sa < sb,
                            CmpPred::Sle => sa <= sb,
                            CmpPred::Sgt => sa > sb,
                            CmpPred::Sge => sa >= sb,
                        };
                        values.insert(func.dfg.inst_result(inst).unwrap(), out as u128);
                    }
                    InstData::Select {
                        cond,
                        then_val,
                        else_val,
                    } => {
                        let c = val(&values, *cond);
                        let v = if c != 0 {
                            val(&values, *then_val)
                        } else {
                            val(&values, *else_val)
                        };
                        values.insert(func.dfg.inst_result(inst).unwrap(), v);
                    }
                    InstData::Call { target, args, .. } => {
                        let name = match target {
                            CallTarget::Direct(f) => self.module.funcs[*f].name.to_string(),
                            CallTarget::Indirect(v) => format!("0x{:x}", val(&values, *v)),
                        };
                        let arg_vals = args.iter().map(|&a| val(&values, a)).collect();
                        self.calls.push((name, arg_vals));
                        if let Some(result) = func.dfg.inst_result(inst) {
                            values.insert(result, 0);
                        }
                    }
                    InstData::Intrinsic { name, args, .. } => {
                        let arg_vals = args.iter().map(|&a| val(&values, a)).collect();
                        self.calls.push((name.to_string(), arg_vals));
                        if let Some(result) = func.dfg.inst_result(inst) {
                            values.insert(result, 0);
                        }
                    }
                    InstData::Ret { value } => {
                        return value.map(|v| val(&values, v));
                    }
                    InstData::Jump { dest } => {
                        next = Some(*dest);
                    }
                    InstData::Br {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        let c = val(&values, *cond);
                        next = Some(if c != 0 { *then_dest } else { *else_dest });
                    }
                }
            }
            block = next.expect("block fell through without terminator");
        }
    }
}
