//! Control flow graph, recomputable from a function's terminators.

use std::collections::BTreeSet;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{dfg::BlockId, function::Function};

#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    entry: PackedOption<BlockId>,
    blocks: SecondaryMap<BlockId, BlockNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BlockNode {
    preds: BTreeSet<BlockId>,
    succs: BTreeSet<BlockId>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Function) {
        self.clear();
        self.entry = func.layout.entry_block().into();

        for block in func.layout.iter_block() {
            let Some(last) = func.layout.last_inst_of(block) else {
                continue;
            };
            for dest in func.dfg.inst(last).branch_dests() {
                self.add_edge(block, dest);
            }
        }
    }

    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].preds.iter()
    }

    pub fn succs_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].succs.iter()
    }

    pub fn pred_num_of(&self, block: BlockId) -> usize {
        self.blocks[block].preds.len()
    }

    pub fn succ_num_of(&self, block: BlockId) -> usize {
        self.blocks[block].succs.len()
    }

    /// The unique predecessor, if the block has exactly one.
    pub fn single_pred_of(&self, block: BlockId) -> Option<BlockId> {
        let preds = &self.blocks[block].preds;
        if preds.len() == 1 {
            preds.first().copied()
        } else {
            None
        }
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[to].preds.insert(from);
        self.blocks[from].succs.insert(to);
    }

    fn clear(&mut self) {
        self.entry = None.into();
        self.blocks.clear();
    }

    /// Blocks in post order; reverse for forward dataflow.
    pub fn post_order(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let Some(entry) = self.entry.expand() else {
            return order;
        };

        let mut state: SecondaryMap<BlockId, u8> = SecondaryMap::default();
        let mut stack = vec![entry];
        while let Some(&block) = stack.last() {
            if state[block] == 0 {
                state[block] = 1;
                for &succ in self.succs_of(block) {
                    if state[succ] == 0 {
                        stack.push(succ);
                    }
                }
            } else {
                stack.pop();
                if state[block] == 1 {
                    state[block] = 2;
                    order.push(block);
                }
            }
        }
        order
    }
}
