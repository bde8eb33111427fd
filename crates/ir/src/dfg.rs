//! The per-function data flow graph: instructions, values, and use sets.

use std::collections::BTreeSet;

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;

use crate::{
    global::GlobalId,
    inst::{InstData, InstId},
    value::{Imm, Value, ValueId},
    Type,
};

/// An opaque reference to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "block");

/// A basic block definition. Ordering and membership of instructions live in
/// [`crate::Layout`]; the block itself carries no data.
#[derive(Debug, Clone, Default)]
pub struct Block {}

#[derive(Debug, Clone, Default)]
pub struct DataFlowGraph {
    pub blocks: PrimaryMap<BlockId, Block>,
    pub values: PrimaryMap<ValueId, Value>,
    insts: PrimaryMap<InstId, InstData>,
    inst_results: SecondaryMap<InstId, PackedOption<ValueId>>,
    imms: FxHashMap<Imm, ValueId>,
    users: SecondaryMap<ValueId, BTreeSet<InstId>>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(Block::default())
    }

    pub fn make_value(&mut self, value: Value) -> ValueId {
        self.values.push(value)
    }

    /// Creates an instruction and registers it as a user of its operands.
    ///
    /// Panics if a `Store` writes a value whose type does not match the
    /// destination's element type.
    pub fn make_inst(&mut self, data: InstData) -> InstId {
        if let InstData::Store { value, addr } = data {
            let value_ty = self.value_ty(value);
            let elem = self.value_ty(addr).pointee();
            assert!(
                elem == Some(value_ty),
                "store type mismatch: {value_ty} into {}",
                self.value_ty(addr),
            );
        }
        let inst = self.insts.push(data);
        self.attach_user(inst);
        inst
    }

    /// Interns an immediate constant.
    pub fn make_imm_value(&mut self, imm: impl Into<Imm>) -> ValueId {
        let imm: Imm = imm.into();
        if let Some(&value) = self.imms.get(&imm) {
            return value;
        }
        let ty = imm.ty();
        let value = self.make_value(Value::Imm { imm, ty });
        self.imms.insert(imm, value);
        value
    }

    /// Creates an address value for a global location of element type
    /// `elem_ty`.
    pub fn make_global_value(&mut self, gv: GlobalId, elem_ty: Type) -> ValueId {
        self.make_value(Value::Global {
            gv,
            ty: elem_ty.ptr_to(),
        })
    }

    pub fn make_arg_value(&mut self, idx: usize, ty: Type) -> ValueId {
        self.make_value(Value::Arg { idx, ty })
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn insts(&self) -> impl Iterator<Item = (InstId, &InstData)> {
        self.insts.iter()
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value]
    }

    pub fn value_ty(&self, value: ValueId) -> Type {
        self.values[value].ty()
    }

    /// The instruction defining `value`, if it is an instruction result.
    pub fn value_inst(&self, value: ValueId) -> Option<InstId> {
        match self.values[value] {
            Value::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    pub fn value_imm(&self, value: ValueId) -> Option<Imm> {
        match self.values[value] {
            Value::Imm { imm, .. } => Some(imm),
            _ => None,
        }
    }

    pub fn value_global(&self, value: ValueId) -> Option<GlobalId> {
        match self.values[value] {
            Value::Global { gv, .. } => Some(gv),
            _ => None,
        }
    }

    /// Replaces the definition of an existing instruction in place, keeping
    /// its program point. This is the only sanctioned way to change a call's
    /// argument list; the old instruction's result value, if any, stays
    /// attached.
    pub fn replace_inst(&mut self, inst: InstId, new: InstData) {
        let old = std::mem::replace(&mut self.insts[inst], new);
        old.visit_values(&mut |value| {
            self.users[value].remove(&inst);
        });
        self.attach_user(inst);
    }

    /// Associates `value` as the result of `inst`.
    pub fn attach_result(&mut self, inst: InstId, value: ValueId) {
        debug_assert!(self.inst_results[inst].is_none());
        self.inst_results[inst] = value.into();
    }

    /// Creates and attaches a result value of type `ty` for `inst`.
    pub fn make_result(&mut self, inst: InstId, ty: Type) -> ValueId {
        let value = self.make_value(Value::Inst { inst, ty });
        self.attach_result(inst, value);
        value
    }

    pub fn inst_result(&self, inst: InstId) -> Option<ValueId> {
        self.inst_results[inst].expand()
    }

    /// The result type of `inst`, deriving operand-typed results (binary,
    /// unary, select) from their first operand.
    pub fn derived_result_ty(&self, inst: InstId) -> Option<Type> {
        let data = &self.insts[inst];
        match data {
            InstData::Binary { args, .. } => Some(self.value_ty(args[0])),
            InstData::Unary { arg, .. } => Some(self.value_ty(*arg)),
            InstData::Select { then_val, .. } => Some(self.value_ty(*then_val)),
            _ => data.result_ty(),
        }
    }

    fn attach_user(&mut self, inst: InstId) {
        let data = self.insts[inst].clone();
        data.visit_values(&mut |value| {
            self.users[value].insert(inst);
        });
    }

    /// All instructions using `value`.
    pub fn users(&self, value: ValueId) -> impl Iterator<Item = &InstId> {
        self.users[value].iter()
    }

    pub fn users_num(&self, value: ValueId) -> usize {
        self.users[value].len()
    }

    /// Rewrites every use of `value` to `new`.
    pub fn replace_uses(&mut self, value: ValueId, new: ValueId) {
        let mut users = std::mem::take(&mut self.users[value]);
        for inst in &users {
            self.insts[*inst].visit_values_mut(&mut |used| {
                if *used == value {
                    *used = new;
                }
            });
        }
        self.users[new].append(&mut users);
    }

    pub fn is_terminator(&self, inst: InstId) -> bool {
        self.insts[inst].is_terminator()
    }
}
