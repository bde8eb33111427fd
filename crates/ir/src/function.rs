//! Function definitions and signatures.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    dfg::{BlockId, DataFlowGraph},
    inst::{InstData, InstId},
    value::ValueId,
    Layout, Type,
};

/// A function signature. Freshly lifted functions carry the unknown
/// signature (`void` return, no parameters, `known == false`) until the
/// param/return pass assigns the real one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: SmallVec<[Type; 8]>,
    pub ret: Type,
    pub variadic: bool,
    /// Whether the signature has been assigned (by analysis or externally).
    pub known: bool,
}

impl Signature {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(params: &[Type], ret: Type) -> Self {
        Self {
            params: params.into(),
            ret,
            variadic: false,
            known: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Function {
    pub name: SmolStr,
    pub sig: Signature,
    pub dfg: DataFlowGraph,
    pub layout: Layout,

    /// Values standing for the declared parameters, index-aligned with
    /// `sig.params`. Empty until the signature is assigned.
    pub arg_values: SmallVec<[ValueId; 8]>,

    /// Upstream-supplied side data: the frame offset of a local allocation,
    /// in bytes relative to the frame base at entry.
    pub stack_offsets: FxHashMap<InstId, i32>,

    /// Blocks whose translation failed; analyses must skip them.
    pub failed_blocks: FxHashSet<BlockId>,
}

impl Function {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.entry_block()
    }

    /// Appends an instruction at the end of `block`.
    ///
    /// Panics when the block already ends in a terminator.
    pub fn append_inst(&mut self, data: InstData, block: BlockId) -> InstId {
        if let Some(last) = self.layout.last_inst_of(block) {
            assert!(
                !self.dfg.is_terminator(last),
                "{block} of `{}` is already terminated",
                self.name
            );
        }
        let inst = self.dfg.make_inst(data);
        self.layout.append_inst(inst, block);
        inst
    }

    /// Inserts an instruction immediately before `before`.
    pub fn insert_inst_before(&mut self, data: InstData, before: InstId) -> InstId {
        let inst = self.dfg.make_inst(data);
        self.layout.insert_inst_before(inst, before);
        inst
    }

    /// Inserts an instruction immediately after `after`, which must not be a
    /// terminator.
    pub fn insert_inst_after(&mut self, data: InstData, after: InstId) -> InstId {
        assert!(!self.dfg.is_terminator(after), "cannot insert after a terminator");
        let inst = self.dfg.make_inst(data);
        self.layout.insert_inst_after(inst, after);
        inst
    }

    /// Prepends an instruction at the start of the entry block.
    pub fn prepend_entry_inst(&mut self, data: InstData) -> InstId {
        let entry = self.entry_block().expect("function has no entry block");
        let inst = self.dfg.make_inst(data);
        self.layout.prepend_inst(inst, entry);
        inst
    }

    pub fn stack_offset(&self, inst: InstId) -> Option<i32> {
        self.stack_offsets.get(&inst).copied()
    }

    pub fn set_stack_offset(&mut self, inst: InstId, offset: i32) {
        self.stack_offsets.insert(inst, offset);
    }
}
