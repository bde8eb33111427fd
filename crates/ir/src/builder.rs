//! Append-style function builder.
//!
//! The lifter and the test suites construct IR through this; it owns the
//! "current block" cursor and attaches result values with their derived
//! types.

use smallvec::SmallVec;

use crate::{
    dfg::BlockId,
    global::GlobalId,
    inst::{BinaryOp, CallTarget, CastOp, CmpPred, InstData, InstId, UnaryOp},
    module::{FuncRef, Module},
    value::{Imm, ValueId},
    Function, Type,
};

pub struct FuncBuilder<'a> {
    pub module: &'a mut Module,
    func: FuncRef,
    block: Option<BlockId>,
}

impl<'a> FuncBuilder<'a> {
    pub fn new(module: &'a mut Module, func: FuncRef) -> Self {
        Self {
            module,
            func,
            block: None,
        }
    }

    pub fn func_ref(&self) -> FuncRef {
        self.func
    }

    pub fn func(&self) -> &Function {
        &self.module.funcs[self.func]
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.module.funcs[self.func]
    }

    pub fn append_block(&mut self) -> BlockId {
        let func = self.func_mut();
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.block = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.block
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        let Some(block) = self.block else {
            return false;
        };
        let func = self.func();
        func.layout
            .last_inst_of(block)
            .is_some_and(|last| func.dfg.is_terminator(last))
    }

    pub fn imm(&mut self, imm: impl Into<Imm>) -> ValueId {
        self.func_mut().dfg.make_imm_value(imm)
    }

    /// The address of a global location.
    pub fn global_addr(&mut self, gv: GlobalId) -> ValueId {
        let elem_ty = self.module.globals.ty(gv);
        self.module.funcs[self.func].dfg.make_global_value(gv, elem_ty)
    }

    pub fn value_ty(&self, value: ValueId) -> Type {
        self.func().dfg.value_ty(value)
    }

    fn insert(&mut self, data: InstData) -> InstId {
        let block = self.block.expect("no current block");
        self.module.funcs[self.func].append_inst(data, block)
    }

    fn insert_with_result(&mut self, data: InstData) -> ValueId {
        let inst = self.insert(data);
        let func = &mut self.module.funcs[self.func];
        let ty = func
            .dfg
            .derived_result_ty(inst)
            .expect("instruction has no result");
        func.dfg.make_result(inst, ty)
    }

    pub fn alloca(&mut self, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Alloca { ty })
    }

    /// Allocates a stack slot with a known frame offset.
    pub fn alloca_at(&mut self, ty: Type, offset: i32) -> ValueId {
        let value = self.alloca(ty);
        let func = self.func_mut();
        let inst = func.dfg.value_inst(value).unwrap();
        func.set_stack_offset(inst, offset);
        value
    }

    pub fn load(&mut self, addr: ValueId) -> ValueId {
        let ty = self
            .value_ty(addr)
            .pointee()
            .expect("load address is not a pointer");
        self.insert_with_result(InstData::Load { addr, ty })
    }

    pub fn store(&mut self, value: ValueId, addr: ValueId) -> InstId {
        self.insert(InstData::Store { value, addr })
    }

    pub fn bitcast(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Bitcast { value, ty })
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Cast { op, value, ty })
    }

    pub fn zext(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Zext, value, ty)
    }

    pub fn sext(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Sext, value, ty)
    }

    pub fn trunc(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Trunc, value, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert_with_result(InstData::Binary { op, args: [lhs, rhs] })
    }

    pub fn unary(&mut self, op: UnaryOp, arg: ValueId) -> ValueId {
        self.insert_with_result(InstData::Unary { op, arg })
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert_with_result(InstData::Icmp { pred, args: [lhs, rhs] })
    }

    pub fn select(&mut self, cond: ValueId, then_val: ValueId, else_val: ValueId) -> ValueId {
        self.insert_with_result(InstData::Select {
            cond,
            then_val,
            else_val,
        })
    }

    /// Emits a call; returns its result value unless `ret_ty` is void.
    pub fn call(
        &mut self,
        target: CallTarget,
        args: &[ValueId],
        ret_ty: Type,
    ) -> Option<ValueId> {
        let data = InstData::Call {
            target,
            args: SmallVec::from_slice(args),
            ret_ty,
        };
        if ret_ty.is_void() {
            self.insert(data);
            None
        } else {
            Some(self.insert_with_result(data))
        }
    }

    pub fn intrinsic(&mut self, name: &str, args: &[ValueId], ret_ty: Type) -> Option<ValueId> {
        let data = InstData::Intrinsic {
            name: name.into(),
            args: SmallVec::from_slice(args),
            ret_ty,
        };
        if ret_ty.is_void() {
            self.insert(data);
            None
        } else {
            Some(self.insert_with_result(data))
        }
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        self.insert(InstData::Ret { value })
    }

    pub fn jump(&mut self, dest: BlockId) -> InstId {
        self.insert(InstData::Jump { dest })
    }

    pub fn br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) -> InstId {
        self.insert(InstData::Br {
            cond,
            then_dest,
            else_dest,
        })
    }
}
