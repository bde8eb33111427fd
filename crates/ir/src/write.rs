//! Textual IR output, the debugging and test oracle.

use std::fmt::Write;

use crate::{
    dfg::BlockId,
    function::Function,
    inst::{CallTarget, InstData, InstId},
    module::{FuncRef, Module},
    value::{Value, ValueId},
};

pub fn display_module(module: &Module) -> String {
    let mut out = String::new();
    for (_, data) in module.globals.iter() {
        let _ = write!(out, "global @{} : {}", data.name, data.ty);
        if let Some(crate::global::Init::Str(s)) = &data.init {
            let _ = write!(out, " = {s:?}");
        }
        out.push('\n');
    }
    if !out.is_empty() {
        out.push('\n');
    }
    for func in module.iter_functions() {
        out.push_str(&display_func(module, func));
        out.push('\n');
    }
    out
}

pub fn display_func(module: &Module, func_ref: FuncRef) -> String {
    let func = &module.funcs[func_ref];
    let mut out = String::new();

    let _ = write!(out, "func @{}(", func.name);
    for (i, param) in func.sig.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{param}");
    }
    if func.sig.variadic {
        if !func.sig.params.is_empty() {
            out.push_str(", ");
        }
        out.push_str("...");
    }
    let _ = writeln!(out, ") -> {} {{", func.sig.ret);

    for block in func.layout.iter_block() {
        let _ = write!(out, "{}:", block_name(block));
        if func.failed_blocks.contains(&block) {
            out.push_str("\t; translation error");
        }
        out.push('\n');
        for inst in func.layout.iter_inst(block) {
            out.push('\t');
            write_inst(&mut out, module, func, inst);
            out.push('\n');
        }
    }
    out.push_str("}\n");
    out
}

fn block_name(block: BlockId) -> String {
    format!("block{}", block.0)
}

fn render_value(module: &Module, func: &Function, value: ValueId) -> String {
    match func.dfg.value(value) {
        Value::Imm { imm, ty } => format!("{imm}.{ty}"),
        Value::Global { gv, .. } => format!("@{}", module.globals.data(*gv).name),
        Value::Arg { idx, .. } => format!("arg{idx}"),
        Value::Inst { .. } => format!("v{}", value.0),
    }
}

fn write_inst(out: &mut String, module: &Module, func: &Function, inst: InstId) {
    let val = |v: ValueId| render_value(module, func, v);
    if let Some(result) = func.dfg.inst_result(inst) {
        let _ = write!(out, "v{} = ", result.0);
    }

    match func.dfg.inst(inst) {
        InstData::Alloca { ty } => {
            let _ = write!(out, "alloca {ty}");
            if let Some(offset) = func.stack_offset(inst) {
                let _ = write!(out, "\t; stack_{offset}");
            }
        }
        InstData::Load { addr, ty } => {
            let _ = write!(out, "load.{ty} {}", val(*addr));
        }
        InstData::Store { value, addr } => {
            let _ = write!(out, "store {}, {}", val(*value), val(*addr));
        }
        InstData::Bitcast { value, ty } => {
            let _ = write!(out, "bitcast {} to {ty}", val(*value));
        }
        InstData::Cast { op, value, ty } => {
            let _ = write!(out, "{} {} to {ty}", op.as_str(), val(*value));
        }
        InstData::Binary { op, args } => {
            let _ = write!(out, "{} {}, {}", op.as_str(), val(args[0]), val(args[1]));
        }
        InstData::Unary { op, arg } => {
            let _ = write!(out, "{} {}", op.as_str(), val(*arg));
        }
        InstData::Icmp { pred, args } => {
            let _ = write!(
                out,
                "icmp {} {}, {}",
                pred.as_str(),
                val(args[0]),
                val(args[1])
            );
        }
        InstData::Select {
            cond,
            then_val,
            else_val,
        } => {
            let _ = write!(
                out,
                "select {}, {}, {}",
                val(*cond),
                val(*then_val),
                val(*else_val)
            );
        }
        InstData::Call {
            target,
            args,
            ret_ty,
        } => {
            let _ = write!(out, "call");
            if !ret_ty.is_void() {
                let _ = write!(out, ".{ret_ty}");
            }
            let callee = match target {
                CallTarget::Direct(f) => format!("@{}", module.funcs[*f].name),
                CallTarget::Indirect(v) => val(*v),
            };
            let _ = write!(out, " {callee}(");
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&val(*arg));
            }
            out.push(')');
        }
        InstData::Intrinsic { name, args, ret_ty } => {
            let _ = write!(out, "intrinsic");
            if !ret_ty.is_void() {
                let _ = write!(out, ".{ret_ty}");
            }
            let _ = write!(out, " {name}(");
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&val(*arg));
            }
            out.push(')');
        }
        InstData::Ret { value } => {
            let _ = write!(out, "ret");
            if let Some(v) = value {
                let _ = write!(out, " {}", val(*v));
            }
        }
        InstData::Jump { dest } => {
            let _ = write!(out, "jump {}", block_name(*dest));
        }
        InstData::Br {
            cond,
            then_dest,
            else_dest,
        } => {
            let _ = write!(
                out,
                "br {}, {}, {}",
                val(*cond),
                block_name(*then_dest),
                block_name(*else_dest)
            );
        }
    }
}
