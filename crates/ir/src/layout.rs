//! Program-point ordering: the block list of a function and the instruction
//! list of each block, both as doubly linked lists over entity maps.

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{dfg::BlockId, inst::InstId};

#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<BlockId, BlockNode>,
    insts: SecondaryMap<InstId, InstNode>,
    entry: PackedOption<BlockId>,
    last_block: PackedOption<BlockId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BlockNode {
    prev: PackedOption<BlockId>,
    next: PackedOption<BlockId>,
    first_inst: PackedOption<InstId>,
    last_inst: PackedOption<InstId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct InstNode {
    block: PackedOption<BlockId>,
    prev: PackedOption<InstId>,
    next: PackedOption<InstId>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.last_block.expand()
    }

    pub fn is_block_inserted(&self, block: BlockId) -> bool {
        Some(block) == self.entry.expand() || self.blocks[block] != BlockNode::default()
    }

    pub fn is_inst_inserted(&self, inst: InstId) -> bool {
        self.insts[inst].block.is_some()
    }

    pub fn append_block(&mut self, block: BlockId) {
        debug_assert!(!self.is_block_inserted(block));

        let mut node = BlockNode::default();
        if let Some(last) = self.last_block.expand() {
            node.prev = last.into();
            self.blocks[last].next = block.into();
        } else {
            self.entry = block.into();
        }
        self.blocks[block] = node;
        self.last_block = block.into();
    }

    pub fn next_block_of(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block].next.expand()
    }

    pub fn iter_block(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.entry.expand(), |&b| self.blocks[b].next.expand())
    }

    pub fn first_inst_of(&self, block: BlockId) -> Option<InstId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].first_inst.expand()
    }

    pub fn last_inst_of(&self, block: BlockId) -> Option<InstId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].last_inst.expand()
    }

    pub fn prev_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].prev.expand()
    }

    pub fn next_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].next.expand()
    }

    /// The block containing `inst`.
    pub fn inst_block(&self, inst: InstId) -> BlockId {
        self.insts[inst].block.expand().expect("inst not inserted")
    }

    pub fn iter_inst(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        debug_assert!(self.is_block_inserted(block));
        std::iter::successors(self.blocks[block].first_inst.expand(), |&i| {
            self.insts[i].next.expand()
        })
    }

    pub fn append_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_inst_inserted(inst));

        let mut node = InstNode {
            block: block.into(),
            ..Default::default()
        };
        let block_node = &mut self.blocks[block];
        if let Some(last) = block_node.last_inst.expand() {
            node.prev = last.into();
            block_node.last_inst = inst.into();
            self.insts[last].next = inst.into();
        } else {
            block_node.first_inst = inst.into();
            block_node.last_inst = inst.into();
        }
        self.insts[inst] = node;
    }

    pub fn prepend_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_inst_inserted(inst));

        let mut node = InstNode {
            block: block.into(),
            ..Default::default()
        };
        let block_node = &mut self.blocks[block];
        if let Some(first) = block_node.first_inst.expand() {
            node.next = first.into();
            block_node.first_inst = inst.into();
            self.insts[first].prev = inst.into();
        } else {
            block_node.first_inst = inst.into();
            block_node.last_inst = inst.into();
        }
        self.insts[inst] = node;
    }

    pub fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        debug_assert!(self.is_inst_inserted(before));
        debug_assert!(!self.is_inst_inserted(inst));

        let block = self.inst_block(before);
        let mut node = InstNode {
            block: block.into(),
            next: before.into(),
            ..Default::default()
        };
        match self.insts[before].prev.expand() {
            Some(prev) => {
                node.prev = prev.into();
                self.insts[prev].next = inst.into();
            }
            None => self.blocks[block].first_inst = inst.into(),
        }
        self.insts[before].prev = inst.into();
        self.insts[inst] = node;
    }

    pub fn insert_inst_after(&mut self, inst: InstId, after: InstId) {
        debug_assert!(self.is_inst_inserted(after));
        debug_assert!(!self.is_inst_inserted(inst));

        let block = self.inst_block(after);
        let mut node = InstNode {
            block: block.into(),
            prev: after.into(),
            ..Default::default()
        };
        match self.insts[after].next.expand() {
            Some(next) => {
                node.next = next.into();
                self.insts[next].prev = inst.into();
            }
            None => self.blocks[block].last_inst = inst.into(),
        }
        self.insts[after].next = inst.into();
        self.insts[inst] = node;
    }

    pub fn remove_inst(&mut self, inst: InstId) {
        debug_assert!(self.is_inst_inserted(inst));

        let node = std::mem::take(&mut self.insts[inst]);
        let block = node.block.expand().unwrap();
        let block_node = &mut self.blocks[block];
        match node.prev.expand() {
            Some(prev) => self.insts[prev].next = node.next,
            None => block_node.first_inst = node.next,
        }
        let block_node = &mut self.blocks[block];
        match node.next.expand() {
            Some(next) => self.insts[next].prev = node.prev,
            None => block_node.last_inst = node.prev,
        }
    }
}
