//! Tracked memory locations.
//!
//! Analyses reason about three kinds of storage: global locations (the
//! register file), stack slots with a known frame offset, and anonymous
//! local allocations. Anything reached through a computed pointer is
//! untracked.

use relift_ir::{Function, InstData, InstId, Value, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Loc {
    /// A global location; registers are tracked at parent granularity
    /// because one global backs each parent register.
    Global(relift_ir::GlobalId),
    /// A stack slot with a known frame offset.
    Stack(i32),
    /// A local allocation without an assigned offset, identified by the
    /// allocating instruction.
    Slot(InstId),
}

/// Resolves an address value to a tracked location, peeling bitcasts.
/// Returns `None` for computed pointers.
pub fn resolve_addr(func: &Function, addr: ValueId) -> Option<Loc> {
    let mut cur = addr;
    loop {
        match func.dfg.value(cur) {
            Value::Global { gv, .. } => return Some(Loc::Global(*gv)),
            Value::Inst { inst, .. } => match func.dfg.inst(*inst) {
                InstData::Alloca { .. } => {
                    return Some(match func.stack_offset(*inst) {
                        Some(offset) => Loc::Stack(offset),
                        None => Loc::Slot(*inst),
                    })
                }
                InstData::Bitcast { value, .. } => cur = *value,
                _ => return None,
            },
            _ => return None,
        }
    }
}

/// The location an instruction reads or writes, if it is a tracked
/// load/store.
pub fn access_loc(func: &Function, inst: InstId) -> Option<Loc> {
    match func.dfg.inst(inst) {
        InstData::Load { addr, .. } | InstData::Store { addr, .. } => resolve_addr(func, *addr),
        _ => None,
    }
}
