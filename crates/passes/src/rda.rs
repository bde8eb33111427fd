//! Reaching-definitions analysis.
//!
//! Classic forward dataflow over tracked locations: for each instruction
//! and location it may read, the set of stores that may supply the value.
//! The worklist is local to one invocation; block state is owned. The
//! result is a pure function of the input IR.

use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;
use relift_ir::{BlockId, ControlFlowGraph, Function, InstData, InstId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    loc::{resolve_addr, Loc},
    AnalysisError,
};

type DefSet = BTreeSet<InstId>;
type State = FxHashMap<Loc, DefSet>;

#[derive(Debug, Default)]
pub struct ReachingDefs {
    block_in: SecondaryMap<BlockId, State>,
}

impl ReachingDefs {
    /// Runs the analysis to a fixpoint. Fails when `iteration_cap` sweeps
    /// do not stabilize the block states.
    pub fn compute(
        func: &Function,
        cfg: &ControlFlowGraph,
        iteration_cap: usize,
    ) -> Result<Self, AnalysisError> {
        let mut order: Vec<BlockId> = cfg.post_order();
        order.reverse();

        let mut block_in: SecondaryMap<BlockId, State> = SecondaryMap::default();
        let mut block_out: SecondaryMap<BlockId, State> = SecondaryMap::default();

        let mut sweeps = 0;
        loop {
            let mut changed = false;
            for &block in &order {
                let mut state: State = State::default();
                for &pred in cfg.preds_of(block) {
                    for (loc, defs) in &block_out[pred] {
                        state.entry(*loc).or_default().extend(defs.iter());
                    }
                }
                if block_in[block] != state {
                    block_in[block] = state.clone();
                    changed = true;
                }
                apply_block(func, block, &mut state);
                if block_out[block] != state {
                    block_out[block] = state;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            sweeps += 1;
            if sweeps > iteration_cap {
                return Err(AnalysisError::FailedFixpoint {
                    func: func.name.to_string(),
                });
            }
        }

        Ok(Self { block_in })
    }

    /// The stores that may define `loc` immediately before `inst`.
    pub fn defs_at(&self, func: &Function, inst: InstId, loc: Loc) -> SmallVec<[InstId; 2]> {
        let block = func.layout.inst_block(inst);
        let mut state = self.block_in[block].clone();
        for cur in func.layout.iter_inst(block) {
            if cur == inst {
                break;
            }
            apply_inst(func, cur, &mut state);
        }
        state
            .get(&loc)
            .map(|defs| defs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The stores that may supply the value read by `load`. `None` when the
    /// load goes through a computed pointer.
    pub fn defs_for_load(&self, func: &Function, load: InstId) -> Option<SmallVec<[InstId; 2]>> {
        let loc = match func.dfg.inst(load) {
            InstData::Load { addr, .. } => resolve_addr(func, *addr)?,
            _ => return None,
        };
        Some(self.defs_at(func, load, loc))
    }
}

fn apply_block(func: &Function, block: BlockId, state: &mut State) {
    // Untranslated blocks contribute nothing.
    if func.failed_blocks.contains(&block) {
        return;
    }
    for inst in func.layout.iter_inst(block) {
        apply_inst(func, inst, state);
    }
}

fn apply_inst(func: &Function, inst: InstId, state: &mut State) {
    if let InstData::Store { addr, .. } = func.dfg.inst(inst) {
        if let Some(loc) = resolve_addr(func, *addr) {
            let defs = state.entry(loc).or_default();
            defs.clear();
            defs.insert(inst);
        }
    }
}
