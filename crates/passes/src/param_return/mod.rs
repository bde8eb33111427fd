//! Parameter/return reconstruction.
//!
//! A whole-module pass over niladic lifted functions: collect candidate
//! argument/return sites from both sides of every call edge, narrow them
//! through the ordered filters, assign types, then rewrite signatures,
//! call sites and returns. Running the pass twice observes no change.

use cranelift_entity::packed_option::PackedOption;
use relift_abi::Abi;
use relift_ir::{
    inst::CallTarget, BlockId, CastOp, ControlFlowGraph, FuncRef, Function, GlobalId, Imm,
    InstData, InstId, Module, Type, ValueId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{
    hints::TypeHints,
    loc::{resolve_addr, Loc},
    rda::ReachingDefs,
    PassConfig,
};

mod filter;
mod format;

use filter::{Candidates, ParamFilter};

/// ABI parameter/return registers resolved to the module's globals.
#[derive(Debug, Default)]
pub(crate) struct RegLocs {
    pub(crate) param_gprs: Vec<GlobalId>,
    pub(crate) param_fprs: Vec<GlobalId>,
    pub(crate) return_gprs: Vec<GlobalId>,
    pub(crate) return_fprs: Vec<GlobalId>,
}

impl RegLocs {
    fn resolve(module: &Module, abi: &Abi) -> Self {
        let bank = abi.bank();
        let resolve = |regs: &[relift_abi::Reg]| {
            regs.iter()
                .filter_map(|&reg| module.globals.by_name(bank.name(reg)))
                .collect()
        };
        Self {
            param_gprs: resolve(abi.param_gprs()),
            param_fprs: resolve(abi.param_fprs()),
            return_gprs: resolve(abi.return_gprs()),
            return_fprs: resolve(abi.return_fprs()),
        }
    }

    fn is_param_reg(&self, gv: GlobalId) -> bool {
        self.param_gprs.contains(&gv) || self.param_fprs.contains(&gv)
    }

    fn is_return_loc(&self, gv: GlobalId) -> bool {
        self.return_gprs.contains(&gv) || self.return_fprs.contains(&gv)
    }
}

/// Where one reconstructed parameter lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamLoc {
    Reg(GlobalId),
    /// Two registers carrying one wider-than-word value, low first.
    RegPair(GlobalId, GlobalId),
    /// A stack slot; the offset is callee-relative for function
    /// definitions and call-relative for call sites.
    Stack(i32),
}

#[derive(Debug, Clone)]
struct Param {
    loc: ParamLoc,
    ty: Type,
}

/// One call site and its caller-side candidates.
#[derive(Debug)]
struct CallSite {
    caller: FuncRef,
    call: InstId,
    /// First store reaching the call, per location.
    arg_stores: FxHashMap<Loc, InstId>,
    cands: Candidates,
    filtered: Option<ParamFilter>,
    /// Loads of return locations dominated by the call.
    ret_loads: Vec<(GlobalId, InstId)>,
}

/// One `ret` and the return-location stores reaching it.
#[derive(Debug)]
struct RetSite {
    stores: Vec<(GlobalId, InstId)>,
}

/// The per-callee dataflow entry: everything known about one called
/// function (or one indirect call target).
#[derive(Debug)]
struct Entry {
    callee: Option<FuncRef>,
    /// Whether reaching definitions were available for the callee body.
    rda_ok: bool,
    /// Signature already known (externally or from a previous run).
    skip: bool,
    calls: Vec<CallSite>,
    /// Callee-side argument loads: entry-block loads of parameter
    /// locations with no reaching store.
    arg_loads: Vec<(Loc, InstId)>,
    ret_stores: Vec<RetSite>,

    params: Vec<Param>,
    ret_ty: Type,
    ret_loc: PackedOption<GlobalId>,
    variadic: bool,
    format_arg: Option<usize>,
    /// For a simple wrapper: the wrapped direct callee.
    wrapped: Option<FuncRef>,
}

impl Entry {
    fn new(callee: Option<FuncRef>) -> Self {
        Self {
            callee,
            rda_ok: true,
            skip: false,
            calls: Vec::new(),
            arg_loads: Vec::new(),
            ret_stores: Vec::new(),
            params: Vec::new(),
            ret_ty: Type::Void,
            ret_loc: None.into(),
            variadic: false,
            format_arg: None,
            wrapped: None,
        }
    }
}

/// Runs parameter/return reconstruction over the whole module.
pub fn run(module: &mut Module, abi: &Abi, hints: &TypeHints, config: &PassConfig) {
    let locs = RegLocs::resolve(module, abi);

    let mut entries = collect(module, &locs, config);
    for entry in &mut entries {
        filter_entry(abi, &locs, entry);
    }
    for entry in &mut entries {
        assign_types(module, abi, &locs, hints, entry);
    }
    detect_wrappers(module, &mut entries);
    inherit_wrapper_signatures(&mut entries);

    apply(module, abi, &locs, &entries);
}

// ---- collection ------------------------------------------------------

fn collect(module: &Module, locs: &RegLocs, config: &PassConfig) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut by_callee: FxHashMap<FuncRef, usize> = FxHashMap::default();

    for func_ref in module.iter_functions() {
        by_callee.insert(func_ref, entries.len());
        entries.push(Entry::new(Some(func_ref)));
    }

    for func_ref in module.iter_functions() {
        let func = &module.funcs[func_ref];
        let cfg = ControlFlowGraph::with_function(func);

        // Callee side.
        let idx = by_callee[&func_ref];
        if func.sig.known {
            entries[idx].skip = true;
        } else {
            match ReachingDefs::compute(func, &cfg, config.rda_iteration_cap) {
                Ok(rda) => {
                    entries[idx].arg_loads = collect_arg_loads(func, locs, &rda);
                    entries[idx].ret_stores = collect_ret_stores(func, locs, &rda);
                }
                Err(err) => {
                    // Conservative fallback: no signature for this
                    // function, and its own call sites stay untouched.
                    warn!(func = %func.name, %err, "analysis unavailable, keeping unknown signature");
                    entries[idx].rda_ok = false;
                    entries[idx].skip = true;
                    continue;
                }
            }
        }

        // Caller side: every call in this function.
        for block in func.layout.iter_block() {
            if func.failed_blocks.contains(&block) {
                continue;
            }
            for inst in func.layout.iter_inst(block) {
                let InstData::Call {
                    target,
                    args,
                    ret_ty,
                } = func.dfg.inst(inst)
                else {
                    continue;
                };
                // Already rewritten.
                if !args.is_empty() || !ret_ty.is_void() {
                    continue;
                }
                let site = collect_call_site(func, &cfg, locs, func_ref, inst);
                match target {
                    CallTarget::Direct(callee) => {
                        entries[by_callee[callee]].calls.push(site);
                    }
                    CallTarget::Indirect(_) => {
                        let mut entry = Entry::new(None);
                        entry.calls.push(site);
                        entries.push(entry);
                    }
                }
            }
        }
    }

    entries
}

/// Entry-block loads of ABI parameter locations with no reaching store.
fn collect_arg_loads(
    func: &Function,
    locs: &RegLocs,
    rda: &ReachingDefs,
) -> Vec<(Loc, InstId)> {
    let mut loads = Vec::new();
    let Some(entry) = func.entry_block() else {
        return loads;
    };
    if func.failed_blocks.contains(&entry) {
        return loads;
    }
    for inst in func.layout.iter_inst(entry) {
        let InstData::Load { addr, .. } = func.dfg.inst(inst) else {
            continue;
        };
        let Some(loc) = resolve_addr(func, *addr) else {
            continue;
        };
        let wanted = match loc {
            Loc::Global(gv) => locs.is_param_reg(gv),
            Loc::Stack(offset) => offset > 0,
            Loc::Slot(_) => false,
        };
        if wanted && rda.defs_at(func, inst, loc).is_empty() {
            loads.push((loc, inst));
        }
    }
    loads
}

/// For every `ret`, the stores into ABI return locations reaching it.
fn collect_ret_stores(func: &Function, locs: &RegLocs, rda: &ReachingDefs) -> Vec<RetSite> {
    let mut sites = Vec::new();
    for block in func.layout.iter_block() {
        if func.failed_blocks.contains(&block) {
            continue;
        }
        let Some(last) = func.layout.last_inst_of(block) else {
            continue;
        };
        if !matches!(func.dfg.inst(last), InstData::Ret { .. }) {
            continue;
        }
        let mut stores = Vec::new();
        for &gv in locs.return_gprs.iter().chain(locs.return_fprs.iter()) {
            for store in rda.defs_at(func, last, Loc::Global(gv)) {
                stores.push((gv, store));
            }
        }
        sites.push(RetSite { stores });
    }
    sites
}

/// Walks backwards from a call through its block and single-predecessor
/// chain, collecting the first store seen per location. An intervening
/// call ends the walk for register locations (the callee clobbers them)
/// but not for stack slots.
fn collect_call_site(
    func: &Function,
    cfg: &ControlFlowGraph,
    locs: &RegLocs,
    caller: FuncRef,
    call: InstId,
) -> CallSite {
    let mut arg_stores: FxHashMap<Loc, InstId> = FxHashMap::default();
    let mut seen: FxHashSet<Loc> = FxHashSet::default();
    let mut regs_blocked = false;

    let mut block = func.layout.inst_block(call);
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    visited.insert(block);
    let mut cursor = func.layout.prev_inst_of(call);

    loop {
        while let Some(inst) = cursor {
            cursor = func.layout.prev_inst_of(inst);
            match func.dfg.inst(inst) {
                InstData::Store { addr, .. } => {
                    let Some(loc) = resolve_addr(func, *addr) else {
                        continue;
                    };
                    let collectable = match loc {
                        Loc::Global(gv) => locs.is_param_reg(gv) && !regs_blocked,
                        Loc::Stack(_) => true,
                        Loc::Slot(_) => false,
                    };
                    if seen.insert(loc) && collectable {
                        arg_stores.insert(loc, inst);
                    }
                }
                InstData::Call { .. } | InstData::Intrinsic { .. } => {
                    regs_blocked = true;
                }
                _ => {}
            }
        }
        match cfg.single_pred_of(block) {
            Some(pred) if visited.insert(pred) && !func.failed_blocks.contains(&pred) => {
                block = pred;
                cursor = func.layout.last_inst_of(pred);
            }
            _ => break,
        }
    }

    let mut cands = Candidates::default();
    for loc in arg_stores.keys() {
        match loc {
            Loc::Global(gv) => {
                cands.regs.insert(*gv);
            }
            Loc::Stack(offset) => cands.stacks.push(*offset),
            Loc::Slot(_) => {}
        }
    }

    CallSite {
        caller,
        call,
        arg_stores,
        cands,
        filtered: None,
        ret_loads: collect_ret_loads(func, cfg, locs, call),
    }
}

/// Walks forward from a call through its block and single-successor chain,
/// collecting loads of return locations not shadowed by a store.
fn collect_ret_loads(
    func: &Function,
    cfg: &ControlFlowGraph,
    locs: &RegLocs,
    call: InstId,
) -> Vec<(GlobalId, InstId)> {
    let mut loads = Vec::new();
    let mut overwritten: FxHashSet<GlobalId> = FxHashSet::default();
    let mut taken: FxHashSet<GlobalId> = FxHashSet::default();

    let mut block = func.layout.inst_block(call);
    let mut cursor = func.layout.next_inst_of(call);
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    visited.insert(block);

    'walk: loop {
        while let Some(inst) = cursor {
            cursor = func.layout.next_inst_of(inst);
            match func.dfg.inst(inst) {
                InstData::Load { addr, .. } => {
                    if let Some(Loc::Global(gv)) = resolve_addr(func, *addr) {
                        if locs.is_return_loc(gv)
                            && !overwritten.contains(&gv)
                            && taken.insert(gv)
                        {
                            loads.push((gv, inst));
                        }
                    }
                }
                InstData::Store { addr, .. } => {
                    if let Some(Loc::Global(gv)) = resolve_addr(func, *addr) {
                        overwritten.insert(gv);
                    }
                }
                InstData::Call { .. } | InstData::Intrinsic { .. } => break 'walk,
                _ => {}
            }
        }
        // Only a sole successor that we alone reach is dominated by the
        // call.
        let succs: Vec<BlockId> = cfg.succs_of(block).copied().collect();
        match succs.as_slice() {
            [next]
                if cfg.pred_num_of(*next) == 1
                    && visited.insert(*next)
                    && !func.failed_blocks.contains(next) =>
            {
                block = *next;
                cursor = func.layout.first_inst_of(block);
            }
            _ => break,
        }
    }
    loads
}

// ---- filtering -------------------------------------------------------

fn filter_entry(abi: &Abi, locs: &RegLocs, entry: &mut Entry) {
    if entry.skip {
        return;
    }
    let slot_bytes = abi.slot_bytes();

    // Per call site, in the fixed order: register prefix, stack sign,
    // stack continuity.
    for call in &mut entry.calls {
        let mut filter = ParamFilter::new(locs, slot_bytes, &call.cands);
        filter.leave_only_continuous_register_prefix(locs);
        filter.leave_only_negative_stacks();
        filter.leave_only_continuous_stack_offsets();
        call.filtered = Some(filter);
    }

    // Callee side.
    let mut callee_filter = if entry.callee.is_some() && !entry.arg_loads.is_empty() {
        let mut cands = Candidates::default();
        for (loc, _) in &entry.arg_loads {
            match loc {
                Loc::Global(gv) => {
                    cands.regs.insert(*gv);
                }
                Loc::Stack(offset) => cands.stacks.push(*offset),
                Loc::Slot(_) => {}
            }
        }
        let mut filter = ParamFilter::new(locs, slot_bytes, &cands);
        filter.leave_only_continuous_register_prefix(locs);
        filter.leave_only_positive_stacks();
        filter.leave_only_continuous_stack_offsets();
        Some(filter)
    } else {
        None
    };

    // Cross-call filters: common registers and equal stack counts; the
    // minimum is adopted.
    if entry.calls.len() > 1 {
        let mut common: Option<FxHashSet<GlobalId>> = None;
        for call in &entry.calls {
            let set = call.filtered.as_ref().unwrap().reg_set();
            common = Some(match common {
                None => set,
                Some(prev) => prev.intersection(&set).copied().collect(),
            });
        }
        let common = common.unwrap_or_default();
        let min_stacks = entry
            .calls
            .iter()
            .map(|c| c.filtered.as_ref().unwrap().stacks.len())
            .min()
            .unwrap_or(0);
        for call in &mut entry.calls {
            let filter = call.filtered.as_mut().unwrap();
            filter.restrict_regs(&common);
            filter.leave_only_continuous_register_prefix(locs);
            filter.restrict_stack_count(min_stacks);
        }
        if let Some(filter) = &mut callee_filter {
            filter.restrict_regs(&common);
            filter.leave_only_continuous_register_prefix(locs);
            filter.restrict_stack_count(min_stacks);
        }
    }

    // The function's parameter locations: the callee body's own loads when
    // it has any, otherwise what its call sites agree on.
    let base = match (&callee_filter, entry.calls.first()) {
        (Some(filter), _) if !filter.is_empty() => filter.clone(),
        (_, Some(first)) => first.filtered.clone().unwrap(),
        _ => return,
    };

    // Stack-arg counts must also agree between the chosen base and every
    // call site.
    let min_stacks = entry
        .calls
        .iter()
        .map(|c| c.filtered.as_ref().unwrap().stacks.len())
        .min()
        .unwrap_or(base.stacks.len())
        .min(base.stacks.len());

    for &gv in &base.gprs {
        entry.params.push(Param {
            loc: ParamLoc::Reg(gv),
            ty: Type::Void, // assigned later
        });
    }
    for &gv in &base.fprs {
        entry.params.push(Param {
            loc: ParamLoc::Reg(gv),
            ty: Type::Void,
        });
    }
    for &offset in base.stacks.iter().take(min_stacks) {
        entry.params.push(Param {
            loc: ParamLoc::Stack(offset),
            ty: Type::Void,
        });
    }
}

// ---- type assignment -------------------------------------------------

fn word_ty(abi: &Abi) -> Type {
    Type::int(abi.word_bits()).unwrap_or(Type::I64)
}

fn assign_types(
    module: &Module,
    abi: &Abi,
    locs: &RegLocs,
    hints: &TypeHints,
    entry: &mut Entry,
) {
    if entry.skip {
        return;
    }
    let word = word_ty(abi);

    // From use context.
    for i in 0..entry.params.len() {
        let ty = match entry.params[i].loc {
            ParamLoc::Reg(gv) => {
                let elem = module.globals.ty(gv);
                if elem.is_float() {
                    elem
                } else {
                    entry
                        .callee
                        .and_then(|f| narrowest_use(&module.funcs[f], gv))
                        .unwrap_or(word)
                }
            }
            ParamLoc::RegPair(..) => word,
            ParamLoc::Stack(offset) => stack_slot_ty(module, entry, offset).unwrap_or(word),
        };
        entry.params[i].ty = ty;
    }

    // Return type: callee-side stores reaching a `ret` win; otherwise
    // caller-side loads after a call.
    let mut ret: Option<(GlobalId, Type)> = None;
    for site in &entry.ret_stores {
        for &(gv, store) in &site.stores {
            if let Some(callee) = entry.callee {
                let func = &module.funcs[callee];
                if let InstData::Store { value, .. } = func.dfg.inst(store) {
                    let ty = func.dfg.value_ty(*value);
                    if ret.is_none() {
                        ret = Some((gv, ty));
                    }
                }
            }
        }
    }
    if ret.is_none() {
        for call in &entry.calls {
            if let Some(&(gv, load)) = call.ret_loads.first() {
                let func = &module.funcs[call.caller];
                if let InstData::Load { ty, .. } = func.dfg.inst(load) {
                    ret = Some((gv, *ty));
                    break;
                }
            }
        }
    }
    if let Some((gv, ty)) = ret {
        entry.ret_loc = Some(gv).into();
        entry.ret_ty = ty;
    }

    // External declarations override; conflicts surface as warnings and the
    // location assignment is rerun under the declared types.
    let decl = entry
        .callee
        .and_then(|f| hints.get(&module.funcs[f].name))
        .cloned();
    if let Some(decl) = decl {
        let inferred: Vec<Type> = entry.params.iter().map(|p| p.ty).collect();
        if inferred.len() != decl.params.len() {
            warn!(
                func = %module.funcs[entry.callee.unwrap()].name,
                inferred = inferred.len(),
                declared = decl.params.len(),
                "external declaration overrides inferred parameters"
            );
        }
        entry.params = assign_decl_locations(abi, locs, &decl.params);
        entry.ret_ty = decl.ret;
        entry.ret_loc = if decl.ret.is_void() {
            None.into()
        } else if decl.ret.is_float() {
            locs.return_fprs.first().copied().into()
        } else {
            locs.return_gprs.first().copied().into()
        };
        entry.variadic = decl.variadic;
        entry.format_arg = decl.format_arg;
    }
}

/// Places declared parameter types into ABI locations: integers into the
/// GPR sequence (pairing registers for wider-than-word types where the ABI
/// allows), floats into the FPR sequence, overflow onto the stack.
fn assign_decl_locations(abi: &Abi, locs: &RegLocs, types: &[Type]) -> Vec<Param> {
    let word_bits = abi.word_bits();
    let slot = abi.slot_bytes();
    let mut params = Vec::with_capacity(types.len());
    let mut gpr = 0usize;
    let mut fpr = 0usize;
    let mut stack = slot; // first caller-area slot

    for &ty in types {
        let loc = if ty.is_float() && fpr < locs.param_fprs.len() {
            let gv = locs.param_fprs[fpr];
            fpr += 1;
            ParamLoc::Reg(gv)
        } else if !ty.is_float()
            && ty.bits() > word_bits
            && abi.max_regs_per_param() > 1
            && gpr + 1 < locs.param_gprs.len()
        {
            let lo = locs.param_gprs[gpr];
            let hi = locs.param_gprs[gpr + 1];
            gpr += 2;
            ParamLoc::RegPair(lo, hi)
        } else if !ty.is_float() && gpr < locs.param_gprs.len() {
            let gv = locs.param_gprs[gpr];
            gpr += 1;
            ParamLoc::Reg(gv)
        } else {
            let offset = stack;
            stack += slot;
            ParamLoc::Stack(offset)
        };
        params.push(Param { loc, ty });
    }
    params
}

/// The narrowest observed use width of a register location inside `func`:
/// the load type, refined by direct truncations of the loaded value.
fn narrowest_use(func: &Function, gv: GlobalId) -> Option<Type> {
    let mut best: Option<u16> = None;
    for (inst, data) in func.dfg.insts() {
        let InstData::Load { addr, ty } = data else {
            continue;
        };
        if resolve_addr(func, *addr) != Some(Loc::Global(gv)) {
            continue;
        }
        let mut width = ty.bits();
        if let Some(result) = func.dfg.inst_result(inst) {
            for &user in func.dfg.users(result) {
                if let InstData::Cast {
                    op: CastOp::Trunc,
                    ty: to,
                    ..
                } = func.dfg.inst(user)
                {
                    width = width.min(to.bits());
                }
            }
        }
        best = Some(best.map_or(width, |b| b.min(width)));
    }
    best.and_then(Type::int)
}

/// Element type of the stack slot backing a stack parameter, looked up on
/// the callee side first, then at the first call site.
fn stack_slot_ty(module: &Module, entry: &Entry, offset: i32) -> Option<Type> {
    if let Some(callee) = entry.callee {
        let func = &module.funcs[callee];
        if let Some(ty) = alloca_ty_at(func, offset) {
            return Some(ty);
        }
    }
    entry
        .calls
        .first()
        .and_then(|call| alloca_ty_at(&module.funcs[call.caller], offset))
}

fn alloca_ty_at(func: &Function, offset: i32) -> Option<Type> {
    func.stack_offsets
        .iter()
        .find(|&(_, &off)| off == offset)
        .and_then(|(&inst, _)| match func.dfg.inst(inst) {
            InstData::Alloca { ty } => Some(*ty),
            _ => None,
        })
}

fn find_alloca(func: &Function, offset: i32) -> Option<ValueId> {
    func.stack_offsets
        .iter()
        .find(|&(_, &off)| off == offset)
        .and_then(|(&inst, _)| func.dfg.inst_result(inst))
}

// ---- wrappers --------------------------------------------------------

/// A simple wrapper forwards one call and passes its result through:
/// exactly one call, and otherwise only moves, stack setup and straight
/// control flow.
fn detect_wrappers(module: &Module, entries: &mut [Entry]) {
    for entry in entries.iter_mut() {
        let Some(func_ref) = entry.callee else {
            continue;
        };
        if entry.skip {
            continue;
        }
        let func = &module.funcs[func_ref];
        let mut the_call: Option<FuncRef> = None;
        let mut simple = true;
        for block in func.layout.iter_block() {
            for inst in func.layout.iter_inst(block) {
                match func.dfg.inst(inst) {
                    InstData::Call { target, .. } => {
                        if the_call.is_some() {
                            simple = false;
                        }
                        match target {
                            CallTarget::Direct(callee) if *callee != func_ref => {
                                the_call = Some(*callee);
                            }
                            _ => simple = false,
                        }
                    }
                    InstData::Alloca { .. }
                    | InstData::Load { .. }
                    | InstData::Store { .. }
                    | InstData::Bitcast { .. }
                    | InstData::Cast { .. }
                    | InstData::Jump { .. }
                    | InstData::Ret { .. } => {}
                    _ => simple = false,
                }
            }
        }
        if simple {
            if let Some(callee) = the_call {
                debug!(func = %func.name, "simple wrapper");
                entry.wrapped = Some(callee);
            }
        }
    }
}

/// Wrappers inherit the signature of the function they forward to,
/// following wrapper chains.
fn inherit_wrapper_signatures(entries: &mut [Entry]) {
    let index_of = |entries: &[Entry], func: FuncRef| {
        entries
            .iter()
            .position(|e| e.callee == Some(func))
    };

    for i in 0..entries.len() {
        let Some(mut target) = entries[i].wrapped else {
            continue;
        };
        // Follow wrapper chains, bounded to rule out cycles.
        let mut hops = 0;
        while hops < 8 {
            let Some(j) = index_of(entries, target) else {
                break;
            };
            match entries[j].wrapped {
                Some(next) => {
                    target = next;
                    hops += 1;
                }
                None => break,
            }
        }
        entries[i].wrapped = Some(target);

        if let Some(j) = index_of(entries, target) {
            if !entries[j].skip {
                let params = entries[j].params.clone();
                let ret_ty = entries[j].ret_ty;
                let ret_loc = entries[j].ret_loc;
                let variadic = entries[j].variadic;
                let entry = &mut entries[i];
                entry.params = params;
                entry.ret_ty = ret_ty;
                entry.ret_loc = ret_loc;
                entry.variadic = variadic;
            }
        }
    }
}

// ---- rewriting -------------------------------------------------------

fn apply(module: &mut Module, abi: &Abi, locs: &RegLocs, entries: &[Entry]) {
    for entry in entries {
        if entry.skip {
            continue;
        }
        if let Some(func_ref) = entry.callee {
            rewrite_definition(module, abi, entry, func_ref);
        }
        for call in &entry.calls {
            rewrite_call(module, abi, locs, entry, call);
        }
    }
}

/// Inserts a load of `gv` immediately before `before`, coerced to `ty`.
fn load_loc_before(
    func: &mut Function,
    globals_ty: Type,
    gv: GlobalId,
    before: InstId,
    ty: Type,
) -> ValueId {
    let addr = func.dfg.make_global_value(gv, globals_ty);
    let load = func.insert_inst_before(
        InstData::Load {
            addr,
            ty: globals_ty,
        },
        before,
    );
    let mut value = func.dfg.make_result(load, globals_ty);
    if globals_ty != ty {
        let data = if ty.is_ptr() || globals_ty.is_ptr() {
            InstData::Bitcast { value, ty }
        } else {
            let op = if globals_ty.bits() > ty.bits() {
                CastOp::Trunc
            } else {
                CastOp::Zext
            };
            InstData::Cast { op, value, ty }
        };
        let cast = func.insert_inst_before(data, before);
        value = func.dfg.make_result(cast, ty);
    }
    value
}

/// Rewrites the function definition: assigns the signature and prepends an
/// entry preamble storing incoming parameters into their ABI locations, so
/// the body's loads of those locations are unchanged downstream.
fn rewrite_definition(module: &mut Module, abi: &Abi, entry: &Entry, func_ref: FuncRef) {
    let word = word_ty(abi);
    let word_bits = abi.word_bits();
    let globals = &module.globals;
    let func = &mut module.funcs[func_ref];

    func.sig.params = entry.params.iter().map(|p| p.ty).collect();
    func.sig.ret = entry.ret_ty;
    func.sig.variadic = entry.variadic;
    func.sig.known = true;

    func.arg_values.clear();
    for (idx, param) in entry.params.iter().enumerate() {
        let value = func.dfg.make_arg_value(idx, param.ty);
        func.arg_values.push(value);
    }

    let Some(entry_block) = func.entry_block() else {
        return;
    };
    let first = func.layout.first_inst_of(entry_block);

    for (idx, param) in entry.params.iter().enumerate() {
        let arg = func.arg_values[idx];
        match param.loc {
            ParamLoc::Reg(gv) => {
                let elem = globals.ty(gv);
                let value = coerce_before(func, first, arg, param.ty, elem);
                let addr = func.dfg.make_global_value(gv, elem);
                insert_store(func, first, value, addr);
            }
            ParamLoc::RegPair(lo, hi) => {
                let lo_elem = globals.ty(lo);
                let hi_elem = globals.ty(hi);
                let low = insert_cast(func, first, CastOp::Trunc, arg, lo_elem);
                let lo_addr = func.dfg.make_global_value(lo, lo_elem);
                insert_store(func, first, low, lo_addr);

                let shift_imm = func.dfg.make_imm_value(Imm::int_of(param.ty, word_bits as i128));
                let shifted = insert_binary(
                    func,
                    first,
                    relift_ir::BinaryOp::Lshr,
                    arg,
                    shift_imm,
                    param.ty,
                );
                let high = insert_cast(func, first, CastOp::Trunc, shifted, hi_elem);
                let hi_addr = func.dfg.make_global_value(hi, hi_elem);
                insert_store(func, first, high, hi_addr);
            }
            ParamLoc::Stack(offset) => {
                // Store into the matching callee slot, when the body has
                // one; otherwise the argument is never read and needs no
                // preamble store.
                let Some(slot) = find_alloca(func, offset) else {
                    continue;
                };
                let elem = func.dfg.value_ty(slot).pointee().unwrap_or(word);
                let value = coerce_before(func, first, arg, param.ty, elem);
                insert_store(func, first, value, slot);
            }
        }
    }

    // Materialize return values: each `ret` loads the return location.
    if !entry.ret_ty.is_void() {
        if let Some(gv) = entry.ret_loc.expand() {
            let elem = globals.ty(gv);
            let rets: Vec<InstId> = func
                .layout
                .iter_block()
                .filter_map(|block| func.layout.last_inst_of(block))
                .filter(|&inst| matches!(func.dfg.inst(inst), InstData::Ret { value: None }))
                .collect();
            for ret in rets {
                let value = load_loc_before(func, elem, gv, ret, entry.ret_ty);
                func.dfg.replace_inst(ret, InstData::Ret { value: Some(value) });
            }
        }
    }
}

fn insert_cast(
    func: &mut Function,
    before: Option<InstId>,
    op: CastOp,
    value: ValueId,
    ty: Type,
) -> ValueId {
    let data = InstData::Cast { op, value, ty };
    let inst = insert_at(func, before, data);
    func.dfg.make_result(inst, ty)
}

/// Coerces `value` from `from` to `to` in front of `before`: pointer types
/// retype via bitcast, integers widen or narrow.
fn coerce_before(
    func: &mut Function,
    before: Option<InstId>,
    value: ValueId,
    from: Type,
    to: Type,
) -> ValueId {
    if from == to {
        return value;
    }
    if from.is_ptr() || to.is_ptr() {
        let inst = insert_at(func, before, InstData::Bitcast { value, ty: to });
        return func.dfg.make_result(inst, to);
    }
    let op = if from.bits() < to.bits() {
        CastOp::Zext
    } else {
        CastOp::Trunc
    };
    insert_cast(func, before, op, value, to)
}

fn insert_binary(
    func: &mut Function,
    before: Option<InstId>,
    op: relift_ir::BinaryOp,
    lhs: ValueId,
    rhs: ValueId,
    ty: Type,
) -> ValueId {
    let inst = insert_at(func, before, InstData::Binary { op, args: [lhs, rhs] });
    func.dfg.make_result(inst, ty)
}

fn insert_store(func: &mut Function, before: Option<InstId>, value: ValueId, addr: ValueId) {
    insert_at(func, before, InstData::Store { value, addr });
}

/// Inserts before `before`, or appends to the entry block when the block
/// is still empty.
fn insert_at(func: &mut Function, before: Option<InstId>, data: InstData) -> InstId {
    match before {
        Some(before) => func.insert_inst_before(data, before),
        None => {
            let entry = func.entry_block().unwrap();
            func.append_inst(data, entry)
        }
    }
}

/// Rewrites one call site: loads of the argument locations are inserted
/// immediately before the call, the niladic call is replaced by a typed
/// one, and the result is stored back into the return location.
fn rewrite_call(
    module: &mut Module,
    abi: &Abi,
    locs: &RegLocs,
    entry: &Entry,
    call_site: &CallSite,
) {
    let word = word_ty(abi);
    let word_bits = abi.word_bits();
    let globals = &module.globals;
    let func = &mut module.funcs[call_site.caller];
    let call = call_site.call;

    let call_stacks: Vec<i32> = call_site
        .filtered
        .as_ref()
        .map(|f| f.stacks.clone())
        .unwrap_or_default();

    let mut args: SmallVec<[ValueId; 4]> = SmallVec::new();
    let mut stack_idx = 0usize;
    let mut gprs_used = 0usize;
    let mut fprs_used = 0usize;

    for param in &entry.params {
        match param.loc {
            ParamLoc::Reg(gv) => {
                if locs.param_gprs.contains(&gv) {
                    gprs_used = gprs_used.max(
                        locs.param_gprs.iter().position(|&g| g == gv).unwrap() + 1,
                    );
                } else if locs.param_fprs.contains(&gv) {
                    fprs_used = fprs_used.max(
                        locs.param_fprs.iter().position(|&g| g == gv).unwrap() + 1,
                    );
                }
                let elem = globals.ty(gv);
                args.push(load_loc_before(func, elem, gv, call, param.ty));
            }
            ParamLoc::RegPair(lo, hi) => {
                gprs_used += 2;
                let lo_elem = globals.ty(lo);
                let hi_elem = globals.ty(hi);
                let low = load_loc_before(func, lo_elem, lo, call, lo_elem);
                let high = load_loc_before(func, hi_elem, hi, call, hi_elem);
                let low_w = insert_cast(func, Some(call), CastOp::Zext, low, param.ty);
                let high_w = insert_cast(func, Some(call), CastOp::Zext, high, param.ty);
                let shift = func.dfg.make_imm_value(Imm::int_of(param.ty, word_bits as i128));
                let shifted = insert_binary(
                    func,
                    Some(call),
                    relift_ir::BinaryOp::Shl,
                    high_w,
                    shift,
                    param.ty,
                );
                let joined = insert_binary(
                    func,
                    Some(call),
                    relift_ir::BinaryOp::Or,
                    low_w,
                    shifted,
                    param.ty,
                );
                args.push(joined);
            }
            ParamLoc::Stack(_) => {
                // A call passes stack arguments from its own outgoing
                // area, lowest offset first.
                let Some(&offset) = call_stacks.get(stack_idx) else {
                    continue;
                };
                stack_idx += 1;
                let Some(slot) = find_alloca(func, offset) else {
                    continue;
                };
                let elem = func.dfg.value_ty(slot).pointee().unwrap_or(word);
                let load = func.insert_inst_before(InstData::Load { addr: slot, ty: elem }, call);
                let value = func.dfg.make_result(load, elem);
                args.push(coerce_before(func, Some(call), value, elem, param.ty));
            }
        }
    }

    // Variadic tail, driven by the format string of this call.
    if entry.variadic {
        if let Some(format_idx) = entry.format_arg {
            if let Some(text) = format_string_for_call(globals, func, entry, call_site, format_idx)
            {
                let extra = format::variadic_arg_types(&text, word);
                for ty in extra {
                    let loc = if ty.is_float() && fprs_used < locs.param_fprs.len() {
                        let gv = locs.param_fprs[fprs_used];
                        fprs_used += 1;
                        Some(ParamLoc::Reg(gv))
                    } else if !ty.is_float() && gprs_used < locs.param_gprs.len() {
                        let gv = locs.param_gprs[gprs_used];
                        gprs_used += 1;
                        Some(ParamLoc::Reg(gv))
                    } else if let Some(&offset) = call_stacks.get(stack_idx) {
                        stack_idx += 1;
                        Some(ParamLoc::Stack(offset))
                    } else {
                        None
                    };
                    match loc {
                        Some(ParamLoc::Reg(gv)) => {
                            let elem = globals.ty(gv);
                            args.push(load_loc_before(func, elem, gv, call, ty));
                        }
                        Some(ParamLoc::Stack(offset)) => {
                            if let Some(slot) = find_alloca(func, offset) {
                                let elem = func.dfg.value_ty(slot).pointee().unwrap_or(word);
                                let load = func
                                    .insert_inst_before(InstData::Load { addr: slot, ty: elem }, call);
                                args.push(func.dfg.make_result(load, elem));
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
    }

    // Wrappers are connected here: their call sites go straight to the
    // wrapped function.
    let target = match (entry.wrapped, func.dfg.inst(call)) {
        (Some(wrapped), _) => CallTarget::Direct(wrapped),
        (None, InstData::Call { target, .. }) => *target,
        _ => return,
    };

    func.dfg.replace_inst(
        call,
        InstData::Call {
            target,
            args,
            ret_ty: entry.ret_ty,
        },
    );

    // The call result flows back through the return location so later
    // loads observe it.
    if !entry.ret_ty.is_void() {
        if let Some(gv) = entry.ret_loc.expand() {
            let result = func.dfg.make_result(call, entry.ret_ty);
            let elem = globals.ty(gv);
            let mut value = result;
            let mut last = call;
            if entry.ret_ty != elem {
                let data = if entry.ret_ty.is_ptr() || elem.is_ptr() {
                    InstData::Bitcast { value, ty: elem }
                } else {
                    let op = if entry.ret_ty.bits() < elem.bits() {
                        CastOp::Zext
                    } else {
                        CastOp::Trunc
                    };
                    InstData::Cast {
                        op,
                        value,
                        ty: elem,
                    }
                };
                let cast = func.insert_inst_after(data, last);
                value = func.dfg.make_result(cast, elem);
                last = cast;
            }
            let addr = func.dfg.make_global_value(gv, elem);
            func.insert_inst_after(InstData::Store { value, addr }, last);
        }
    }
}

/// Finds the literal format string a call passes: the store reaching the
/// format parameter's location, resolved to a string-initialized global.
fn format_string_for_call(
    globals: &relift_ir::GlobalStore,
    func: &Function,
    entry: &Entry,
    call_site: &CallSite,
    format_idx: usize,
) -> Option<String> {
    let param = entry.params.get(format_idx)?;
    let loc = match param.loc {
        ParamLoc::Reg(gv) => Loc::Global(gv),
        ParamLoc::Stack(_) => {
            let offset = *call_site.filtered.as_ref()?.stacks.first()?;
            Loc::Stack(offset)
        }
        ParamLoc::RegPair(..) => return None,
    };
    let store = *call_site.arg_stores.get(&loc)?;
    let InstData::Store { value, .. } = func.dfg.inst(store) else {
        return None;
    };
    let Some(Loc::Global(gv)) = resolve_addr(func, *value) else {
        return None;
    };
    globals.str_init(gv).map(str::to_owned)
}
