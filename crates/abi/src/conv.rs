//! Concrete register banks and calling-convention tables.

use cranelift_entity::packed_option::PackedOption;

use crate::{
    reg::{Reg, RegBank, RegClass},
    Abi, AbiError, Arch, CallConv, StackDir,
};

pub(crate) fn build(arch: Arch, conv: CallConv) -> Result<Abi, AbiError> {
    match (arch, conv) {
        (Arch::X86, CallConv::Cdecl | CallConv::Stdcall | CallConv::Fastcall | CallConv::Watcom) => {
            Ok(x86(conv))
        }
        (Arch::X64, CallConv::SysV | CallConv::Ms) => Ok(x64(conv)),
        (Arch::Aarch64, CallConv::Aapcs64) => Ok(aarch64()),
        (Arch::Arm, CallConv::Aapcs) => Ok(arm()),
        (Arch::Mips, CallConv::O32) => Ok(mips()),
        (Arch::PowerPc, CallConv::PpcSysV) => Ok(powerpc()),
        _ => Err(AbiError::UnsupportedConvention { arch, conv }),
    }
}

fn x86(conv: CallConv) -> Abi {
    let mut bank = RegBank::new();

    let gpr = |bank: &mut RegBank, name32: &str, name16: &str| {
        let wide = bank.add(name32, 32, RegClass::Gpr);
        bank.add_sub(name16, 16, wide);
        wide
    };

    let eax = gpr(&mut bank, "eax", "ax");
    let ecx = gpr(&mut bank, "ecx", "cx");
    let edx = gpr(&mut bank, "edx", "dx");
    let ebx = gpr(&mut bank, "ebx", "bx");
    gpr(&mut bank, "esi", "si");
    gpr(&mut bank, "edi", "di");
    bank.add("ebp", 32, RegClass::Gpr);
    let esp = bank.add("esp", 32, RegClass::Sp);
    let st0 = bank.add("st0", 80, RegClass::Fpr);

    let param_gprs = match conv {
        CallConv::Fastcall => vec![ecx, edx],
        CallConv::Watcom => vec![eax, edx, ebx, ecx],
        _ => vec![],
    };

    Abi {
        arch: Arch::X86,
        conv,
        bank,
        param_gprs,
        param_fprs: vec![],
        return_gprs: vec![eax, edx],
        return_fprs: vec![st0],
        sp: esp,
        lr: None.into(),
        flags: [PackedOption::default(); 4],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 1,
    }
}

fn x64(conv: CallConv) -> Abi {
    let mut bank = RegBank::new();

    let gpr = |bank: &mut RegBank, name64: &str, name32: &str| {
        let wide = bank.add(name64, 64, RegClass::Gpr);
        bank.add_sub(name32, 32, wide);
        wide
    };

    let rax = gpr(&mut bank, "rax", "eax");
    let rcx = gpr(&mut bank, "rcx", "ecx");
    let rdx = gpr(&mut bank, "rdx", "edx");
    gpr(&mut bank, "rbx", "ebx");
    let rsi = gpr(&mut bank, "rsi", "esi");
    let rdi = gpr(&mut bank, "rdi", "edi");
    gpr(&mut bank, "rbp", "ebp");
    let r8 = gpr(&mut bank, "r8", "r8d");
    let r9 = gpr(&mut bank, "r9", "r9d");
    for n in 10..=15 {
        let name = format!("r{n}");
        let sub = format!("r{n}d");
        let wide = bank.add(&name, 64, RegClass::Gpr);
        bank.add_sub(&sub, 32, wide);
    }
    let rsp = bank.add("rsp", 64, RegClass::Sp);

    let mut xmm = Vec::with_capacity(16);
    for n in 0..16 {
        xmm.push(bank.add(&format!("xmm{n}"), 128, RegClass::Fpr));
    }

    let (param_gprs, param_fprs) = match conv {
        CallConv::Ms => (vec![rcx, rdx, r8, r9], xmm[..4].to_vec()),
        _ => (vec![rdi, rsi, rdx, rcx, r8, r9], xmm[..8].to_vec()),
    };
    let (return_gprs, return_fprs) = match conv {
        CallConv::Ms => (vec![rax], vec![xmm[0]]),
        _ => (vec![rax, rdx], vec![xmm[0], xmm[1]]),
    };

    Abi {
        arch: Arch::X64,
        conv,
        bank,
        param_gprs,
        param_fprs,
        return_gprs,
        return_fprs,
        sp: rsp,
        lr: None.into(),
        flags: [PackedOption::default(); 4],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 1,
    }
}

fn aarch64() -> Abi {
    let mut bank = RegBank::new();

    let mut xs = Vec::with_capacity(31);
    for n in 0..=30 {
        let x = bank.add(&format!("x{n}"), 64, RegClass::Gpr);
        bank.add_sub(&format!("w{n}"), 32, x);
        xs.push(x);
    }
    let sp = bank.add("sp", 64, RegClass::Sp);
    bank.add("pc", 64, RegClass::Pc);

    let mut vs = Vec::with_capacity(32);
    for n in 0..32 {
        let v = bank.add(&format!("v{n}"), 128, RegClass::Fpr);
        let d = bank.add_sub(&format!("d{n}"), 64, v);
        bank.add_sub(&format!("s{n}"), 32, d);
        vs.push(v);
    }

    let n = bank.add("cpsr_n", 1, RegClass::Flag);
    let z = bank.add("cpsr_z", 1, RegClass::Flag);
    let c = bank.add("cpsr_c", 1, RegClass::Flag);
    let v = bank.add("cpsr_v", 1, RegClass::Flag);

    Abi {
        arch: Arch::Aarch64,
        conv: CallConv::Aapcs64,
        bank,
        param_gprs: xs[..8].to_vec(),
        param_fprs: vs[..8].to_vec(),
        return_gprs: vec![xs[0], xs[1]],
        return_fprs: vec![vs[0], vs[1]],
        sp,
        lr: Some(xs[30]).into(),
        flags: [n.into(), z.into(), c.into(), v.into()],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 1,
    }
}

fn arm() -> Abi {
    let mut bank = RegBank::new();

    let mut rs = Vec::with_capacity(13);
    for n in 0..=12 {
        rs.push(bank.add(&format!("r{n}"), 32, RegClass::Gpr));
    }
    let sp = bank.add("sp", 32, RegClass::Sp);
    let lr = bank.add("lr", 32, RegClass::Lr);
    bank.add("pc", 32, RegClass::Pc);

    let mut ds = Vec::with_capacity(16);
    for n in 0..16 {
        ds.push(bank.add(&format!("d{n}"), 64, RegClass::Fpr));
    }

    Abi {
        arch: Arch::Arm,
        conv: CallConv::Aapcs,
        bank,
        param_gprs: rs[..4].to_vec(),
        param_fprs: ds[..4].to_vec(),
        return_gprs: vec![rs[0], rs[1]],
        return_fprs: vec![ds[0], ds[1]],
        sp,
        lr: Some(lr).into(),
        flags: [PackedOption::default(); 4],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 2,
    }
}

fn mips() -> Abi {
    let mut bank = RegBank::new();

    let v0 = bank.add("v0", 32, RegClass::Gpr);
    let v1 = bank.add("v1", 32, RegClass::Gpr);
    let mut args = Vec::with_capacity(4);
    for n in 0..4 {
        args.push(bank.add(&format!("a{n}"), 32, RegClass::Gpr));
    }
    for n in 0..10 {
        bank.add(&format!("t{n}"), 32, RegClass::Gpr);
    }
    for n in 0..8 {
        bank.add(&format!("s{n}"), 32, RegClass::Gpr);
    }
    let sp = bank.add("sp", 32, RegClass::Sp);
    let ra = bank.add("ra", 32, RegClass::Lr);

    let mut fs = Vec::with_capacity(32);
    for n in 0..32 {
        fs.push(bank.add(&format!("f{n}"), 64, RegClass::Fpr));
    }

    Abi {
        arch: Arch::Mips,
        conv: CallConv::O32,
        bank,
        param_gprs: args,
        param_fprs: vec![fs[12], fs[14]],
        return_gprs: vec![v0, v1],
        return_fprs: vec![fs[0], fs[2]],
        sp,
        lr: Some(ra).into(),
        flags: [PackedOption::default(); 4],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 2,
    }
}

fn powerpc() -> Abi {
    let mut bank = RegBank::new();

    let mut rs = Vec::with_capacity(32);
    for n in 0..32 {
        let class = if n == 1 { RegClass::Sp } else { RegClass::Gpr };
        rs.push(bank.add(&format!("r{n}"), 32, class));
    }
    let lr = bank.add("lr", 32, RegClass::Lr);

    let mut fs = Vec::with_capacity(32);
    for n in 0..32 {
        fs.push(bank.add(&format!("f{n}"), 64, RegClass::Fpr));
    }

    Abi {
        arch: Arch::PowerPc,
        conv: CallConv::PpcSysV,
        bank,
        param_gprs: rs[3..=10].to_vec(),
        param_fprs: fs[1..=8].to_vec(),
        return_gprs: vec![rs[3], rs[4]],
        return_fprs: vec![fs[1]],
        sp: rs[1],
        lr: Some(lr).into(),
        flags: [PackedOption::default(); 4],
        stack_param_dir: StackDir::AscendingFromSp,
        max_regs_per_param: 2,
    }
}
