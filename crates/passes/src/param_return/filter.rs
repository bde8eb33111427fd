//! Candidate filters, applied in a fixed order.
//!
//! Each filter only narrows the candidate set, so the final set is uniquely
//! determined by the input. The steps are separate methods so an alternate
//! ordering can be reproduced for regression comparisons.

use relift_ir::GlobalId;
use rustc_hash::FxHashSet;

use super::RegLocs;

/// Raw candidate locations of one side of a call edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct Candidates {
    pub regs: FxHashSet<GlobalId>,
    pub stacks: Vec<i32>,
}

/// Orders and narrows candidates into parameter locations.
#[derive(Debug, Clone)]
pub(super) struct ParamFilter {
    /// Parameter GPRs present, in ABI order (gaps possible until the prefix
    /// filter runs).
    pub gprs: Vec<GlobalId>,
    pub fprs: Vec<GlobalId>,
    /// Stack offsets present, ascending.
    pub stacks: Vec<i32>,
    slot_bytes: i32,
}

impl ParamFilter {
    pub fn new(locs: &RegLocs, slot_bytes: i32, cands: &Candidates) -> Self {
        let gprs = locs
            .param_gprs
            .iter()
            .copied()
            .filter(|gv| cands.regs.contains(gv))
            .collect();
        let fprs = locs
            .param_fprs
            .iter()
            .copied()
            .filter(|gv| cands.regs.contains(gv))
            .collect();
        let mut stacks = cands.stacks.clone();
        stacks.sort_unstable();
        stacks.dedup();
        Self {
            gprs,
            fprs,
            stacks,
            slot_bytes,
        }
    }

    /// Keeps only an unbroken prefix of the ABI register ordering, GPRs and
    /// FPRs independently. `{r0, r2}` drops `r2`: no gap allowed.
    pub fn leave_only_continuous_register_prefix(&mut self, locs: &RegLocs) {
        fn prefix(present: &[GlobalId], order: &[GlobalId]) -> Vec<GlobalId> {
            let set: FxHashSet<GlobalId> = present.iter().copied().collect();
            order
                .iter()
                .copied()
                .take_while(|gv| set.contains(gv))
                .collect()
        }
        self.gprs = prefix(&self.gprs, &locs.param_gprs);
        self.fprs = prefix(&self.fprs, &locs.param_fprs);
    }

    /// Keeps only the contiguous run of stack offsets starting at the
    /// lowest candidate; a gap terminates the run.
    pub fn leave_only_continuous_stack_offsets(&mut self) {
        let mut kept: Vec<i32> = Vec::with_capacity(self.stacks.len());
        for &offset in &self.stacks {
            match kept.last() {
                None => kept.push(offset),
                Some(&prev) if offset == prev + self.slot_bytes => kept.push(offset),
                Some(_) => break,
            }
        }
        self.stacks = kept;
    }

    /// Caller side: outgoing arguments live below the frame base.
    pub fn leave_only_negative_stacks(&mut self) {
        self.stacks.retain(|&offset| offset < 0);
    }

    /// Callee side: incoming arguments live in the caller's area above the
    /// frame base.
    pub fn leave_only_positive_stacks(&mut self) {
        self.stacks.retain(|&offset| offset > 0);
    }

    /// Drops registers absent from `keep`.
    pub fn restrict_regs(&mut self, keep: &FxHashSet<GlobalId>) {
        self.gprs.retain(|gv| keep.contains(gv));
        self.fprs.retain(|gv| keep.contains(gv));
    }

    /// Caps the stack-argument count.
    pub fn restrict_stack_count(&mut self, count: usize) {
        self.stacks.truncate(count);
    }

    pub fn reg_set(&self) -> FxHashSet<GlobalId> {
        self.gprs.iter().chain(self.fprs.iter()).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.gprs.is_empty() && self.fprs.is_empty() && self.stacks.is_empty()
    }
}
