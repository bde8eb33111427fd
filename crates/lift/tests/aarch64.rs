//! Concrete-value checks of the lifted AArch64 semantics: flags, extended
//! operands, addressing modes, and control flow.

mod common;

use common::Machine;
use relift_abi::{Abi, Arch, Reg};
use relift_ir::{FuncRef, Module};
use relift_lift::{Cond, Extend, Lifter, MachInst, MemOperand, Mnemonic, Operand, ShiftOp};

struct Harness {
    abi: Abi,
}

impl Harness {
    fn new() -> Self {
        Self {
            abi: Abi::with_default_conv(Arch::Aarch64),
        }
    }

    fn r(&self, name: &str) -> Reg {
        self.abi.reg_by_name(name).unwrap()
    }

    fn lift(&self, insts: &[MachInst]) -> (Module, FuncRef) {
        let mut module = Module::new();
        let mut lifter = Lifter::new(&mut module, &self.abi).unwrap();
        let func = lifter.lift_function("test", insts).unwrap();
        (module, func)
    }
}

fn ret(addr: u64) -> MachInst {
    MachInst::new(addr, Mnemonic::Ret)
}

// ---- adc / sbc -------------------------------------------------------

#[test]
fn adc_without_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Adc)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x1230);
    m.set_reg("x2", 0x4);
    m.set_flag("cpsr_c", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1234);
}

#[test]
fn adc_with_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Adc)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x1230);
    m.set_reg("x2", 0x4);
    m.set_flag("cpsr_c", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1235);
}

#[test]
fn adcs_sets_zero_and_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Adc)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xffff_ffff_ffff_fffe);
    m.set_reg("x2", 0x1);
    m.set_flag("cpsr_c", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 0);
    assert!(!m.flag("cpsr_n"));
    assert!(m.flag("cpsr_z"));
    assert!(m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_v"));
}

#[test]
fn adcs_32bit_wraps_at_word() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Adc)
            .op(h.r("w0"))
            .op(h.r("w1"))
            .op(h.r("w2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xffff_ffff_ffff_fffe);
    m.set_reg("x2", 0x1);
    m.set_flag("cpsr_c", true);
    m.run(func);
    // 0xfffffffe + 1 + 1 wraps to zero in 32 bits; the write clears the
    // upper half of x0.
    assert_eq!(m.reg("x0"), 0);
    assert!(m.flag("cpsr_z"));
    assert!(m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_v"));
}

#[test]
fn sbc_with_carry_set_is_plain_sub() {
    let h = Harness::new();
    let insts = [
        MachInst::new(0x1000, Mnemonic::Sbc)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        ret(0x1004),
    ];
    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 10);
    m.set_reg("x2", 3);
    m.set_flag("cpsr_c", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 7);

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 10);
    m.set_reg("x2", 3);
    m.set_flag("cpsr_c", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 6);
}

// ---- add / sub / cmp -------------------------------------------------

#[test]
fn add_extended_register_sxth() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Add)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(Operand::ExtReg {
                reg: h.r("w2"),
                extend: Extend::Sxth,
                shift: 0,
            }),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", u64::MAX); // -1
    m.set_reg("x2", 0xfffb); // -5 as i16
    m.run(func);
    assert_eq!(m.reg("x0"), 0xffff_ffff_ffff_fffa); // -6
}

#[test]
fn add_shifted_register() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Add)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(Operand::ShiftedReg {
                reg: h.r("x2"),
                op: ShiftOp::Lsl,
                amount: 3,
            }),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x100);
    m.set_reg("x2", 0x2);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x110);
}

#[test]
fn subs_without_borrow_sets_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Sub)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 5);
    m.set_reg("x2", 3);
    m.run(func);
    assert_eq!(m.reg("x0"), 2);
    assert!(!m.flag("cpsr_n"));
    assert!(!m.flag("cpsr_z"));
    assert!(m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_v"));
}

#[test]
fn subs_with_borrow_clears_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Sub)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 3);
    m.set_reg("x2", 5);
    m.run(func);
    assert_eq!(m.reg("x0"), (-2i64) as u64);
    assert!(m.flag("cpsr_n"));
    assert!(!m.flag("cpsr_z"));
    assert!(!m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_v"));
}

#[test]
fn subs_signed_overflow() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Sub)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x8000_0000_0000_0000); // i64::MIN
    m.set_reg("x2", 1);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x7fff_ffff_ffff_ffff);
    assert!(!m.flag("cpsr_n"));
    assert!(m.flag("cpsr_v"));
}

#[test]
fn cmp_equal_sets_zero_and_carry() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Cmp).op(h.r("x1")).op(h.r("x2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x1234);
    m.set_reg("x2", 0x1234);
    m.run(func);
    assert!(m.flag("cpsr_z"));
    assert!(m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_n"));
    assert!(!m.flag("cpsr_v"));
}

#[test]
fn negs_of_one() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Neg)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 1);
    m.run(func);
    assert_eq!(m.reg("x0"), u64::MAX);
    assert!(m.flag("cpsr_n"));
    assert!(!m.flag("cpsr_z"));
    assert!(!m.flag("cpsr_c"));
    assert!(!m.flag("cpsr_v"));
}

// ---- logical ---------------------------------------------------------

#[test]
fn ands_updates_nz_only() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::And)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .flags(),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xff00);
    m.set_reg("x2", 0x0ff0);
    m.set_flag("cpsr_c", true);
    m.set_flag("cpsr_v", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x0f00);
    assert!(!m.flag("cpsr_n"));
    assert!(!m.flag("cpsr_z"));
    // C and V are untouched by logical operations.
    assert!(m.flag("cpsr_c"));
    assert!(m.flag("cpsr_v"));
}

#[test]
fn tst_disjoint_bits_sets_zero() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Tst).op(h.r("x1")).op(h.r("x2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xf0);
    m.set_reg("x2", 0x0f);
    m.run(func);
    assert!(m.flag("cpsr_z"));
    assert_eq!(m.reg("x0"), 0);
}

#[test]
fn mvn_inverts() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Mvn).op(h.r("w0")).op(h.r("w1")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x0000_0000_1234_5678);
    m.run(func);
    // 32-bit inversion, zero-extended into x0.
    assert_eq!(m.reg("x0"), 0x0000_0000_edcb_a987);
}

// ---- shifts ----------------------------------------------------------

#[test]
fn shift_amount_is_masked_to_width() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Lsl)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 1);
    m.set_reg("x2", 67); // 67 & 63 == 3
    m.run(func);
    assert_eq!(m.reg("x0"), 8);
}

#[test]
fn shift_amount_mask_is_32bit_for_w_regs() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Lsl)
            .op(h.r("w0"))
            .op(h.r("w1"))
            .op(h.r("w2")),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 1);
    m.set_reg("x2", 35); // 35 & 31 == 3
    m.run(func);
    assert_eq!(m.reg("x0"), 8);
}

#[test]
fn asr_is_arithmetic() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Asr)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(4i64),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", (-32i64) as u64);
    m.run(func);
    assert_eq!(m.reg("x0"), (-2i64) as u64);
}

#[test]
fn ror_rotates() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ror)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(8i64),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x1122_3344_5566_7788);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x8811_2233_4455_6677);
}

#[test]
fn ror_by_zero_is_identity() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ror)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(0i64),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x1234_5678);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1234_5678);
}

// ---- moves -----------------------------------------------------------

#[test]
fn movz_with_shift() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Movz)
            .op(h.r("x0"))
            .op(Operand::ShiftedImm {
                imm: 0x1234,
                shift: 16,
            }),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1234_0000);
}

#[test]
fn movn_inverts_immediate() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Movn).op(h.r("w0")).op(0i64),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x0"), 0xffff_ffff);
}

#[test]
fn movk_keeps_other_bits() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Movk)
            .op(h.r("x0"))
            .op(Operand::ShiftedImm {
                imm: 0x5555,
                shift: 16,
            }),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x1111_2222_3333_4444);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1111_2222_5555_4444);
}

// ---- pc-relative -----------------------------------------------------

#[test]
fn adr_resolves_relative_to_pc() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Adr).op(h.r("x0")).op(0x10i64),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x1010);
}

#[test]
fn adrp_resolves_page() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1234, Mnemonic::Adrp).op(h.r("x0")).op(1i64),
        ret(0x1238),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x0"), 0x2000);
}

// ---- memory ----------------------------------------------------------

#[test]
fn str_then_ldr_round_trips() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Str)
            .op(h.r("x1"))
            .op(MemOperand::base(h.r("x0"))),
        MachInst::new(0x1004, Mnemonic::Ldr)
            .op(h.r("x2"))
            .op(MemOperand::base(h.r("x0"))),
        ret(0x1008),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.set_reg("x1", 0x1122_3344_5566_7788);
    m.run(func);
    assert_eq!(m.read_mem_u64(0x4000), 0x1122_3344_5566_7788);
    assert_eq!(m.reg("x2"), 0x1122_3344_5566_7788);
}

#[test]
fn ldr_pre_index_writes_base_and_uses_new_address() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldr)
            .op(h.r("x1"))
            .op(MemOperand::base_disp(h.r("x0"), 8).pre_index()),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.write_mem(0x4008, &0xdead_beefu64.to_le_bytes());
    m.run(func);
    assert_eq!(m.reg("x1"), 0xdead_beef);
    assert_eq!(m.reg("x0"), 0x4008);
}

#[test]
fn ldr_post_index_uses_old_address_then_writes_base() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldr)
            .op(h.r("x1"))
            .op(MemOperand::base_disp(h.r("x0"), 8).post_index()),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4008);
    m.write_mem(0x4008, &0xdead_beefu64.to_le_bytes());
    m.run(func);
    assert_eq!(m.reg("x1"), 0xdead_beef);
    assert_eq!(m.reg("x0"), 0x4010);
}

#[test]
fn pre_and_post_pair_differ_only_in_final_base() {
    // Both forms access 0x4008; only the final base value differs.
    let h = Harness::new();
    let pre = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldr)
            .op(h.r("x1"))
            .op(MemOperand::base_disp(h.r("x0"), 8).pre_index()),
        ret(0x1004),
    ]);
    let post = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldr)
            .op(h.r("x1"))
            .op(MemOperand::base_disp(h.r("x0"), 8).post_index()),
        ret(0x1004),
    ]);

    let mut m1 = Machine::new(&pre.0);
    m1.set_reg("x0", 0x4000);
    m1.write_mem(0x4008, &0x55u64.to_le_bytes());
    m1.run(pre.1);

    let mut m2 = Machine::new(&post.0);
    m2.set_reg("x0", 0x4008);
    m2.write_mem(0x4008, &0x55u64.to_le_bytes());
    m2.run(post.1);

    assert_eq!(m1.reg("x1"), m2.reg("x1"));
    assert_eq!(m1.reg("x0"), 0x4008);
    assert_eq!(m2.reg("x0"), 0x4010);
}

#[test]
fn ldr_with_extended_index() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldr)
            .op(h.r("x1"))
            .op(MemOperand::indexed(
                h.r("x0"),
                h.r("w2"),
                Some(Extend::Sxtw),
                3,
            )),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4010);
    m.set_reg("x2", (-2i32) as u32 as u64); // index -2, scaled by 8
    m.write_mem(0x4000, &0xabcdu64.to_le_bytes());
    m.run(func);
    assert_eq!(m.reg("x1"), 0xabcd);
}

#[test]
fn ldrb_zero_extends_ldrsb_sign_extends() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldrb)
            .op(h.r("w1"))
            .op(MemOperand::base(h.r("x0"))),
        MachInst::new(0x1004, Mnemonic::Ldrsb)
            .op(h.r("w2"))
            .op(MemOperand::base(h.r("x0"))),
        MachInst::new(0x1008, Mnemonic::Ldrsb)
            .op(h.r("x3"))
            .op(MemOperand::base(h.r("x0"))),
        ret(0x100c),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.write_mem(0x4000, &[0x80]);
    m.run(func);
    assert_eq!(m.reg("x1"), 0x80);
    assert_eq!(m.reg("x2"), 0xffff_ff80);
    assert_eq!(m.reg("x3"), 0xffff_ffff_ffff_ff80);
}

#[test]
fn ldrsw_sign_extends_word() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldrsw)
            .op(h.r("x1"))
            .op(MemOperand::base(h.r("x0"))),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.write_mem(0x4000, &0x8000_0000u32.to_le_bytes());
    m.run(func);
    assert_eq!(m.reg("x1"), 0xffff_ffff_8000_0000);
}

#[test]
fn stp_then_ldp() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Stp)
            .op(h.r("x1"))
            .op(h.r("x2"))
            .op(MemOperand::base(h.r("x0"))),
        MachInst::new(0x1004, Mnemonic::Ldp)
            .op(h.r("x3"))
            .op(h.r("x4"))
            .op(MemOperand::base(h.r("x0"))),
        ret(0x1008),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.set_reg("x1", 0x1111);
    m.set_reg("x2", 0x2222);
    m.run(func);
    assert_eq!(m.reg("x3"), 0x1111);
    assert_eq!(m.reg("x4"), 0x2222);
    assert_eq!(m.read_mem_u64(0x4008), 0x2222);
}

#[test]
fn ldpsw_sign_extends_both_words() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Ldpsw)
            .op(h.r("x1"))
            .op(h.r("x2"))
            .op(MemOperand::base(h.r("x0"))),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x0", 0x4000);
    m.write_mem(0x4000, &0x8000_0000u32.to_le_bytes());
    m.write_mem(0x4004, &0x7fff_ffffu32.to_le_bytes());
    m.run(func);
    assert_eq!(m.reg("x1"), 0xffff_ffff_8000_0000);
    assert_eq!(m.reg("x2"), 0x7fff_ffff);
}

// ---- conditional select ----------------------------------------------

#[test]
fn csel_picks_by_condition() {
    let h = Harness::new();
    let insts = [
        MachInst::new(0x1000, Mnemonic::Csel)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .with_cond(Cond::Eq),
        ret(0x1004),
    ];
    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xaaaa);
    m.set_reg("x2", 0xbbbb);
    m.set_flag("cpsr_z", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 0xaaaa);

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xaaaa);
    m.set_reg("x2", 0xbbbb);
    m.set_flag("cpsr_z", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 0xbbbb);
}

#[test]
fn csel_al_is_mov() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Csel)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .with_cond(Cond::Al),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xaaaa);
    m.set_reg("x2", 0xbbbb);
    m.run(func);
    assert_eq!(m.reg("x0"), 0xaaaa);
}

#[test]
fn cset_al_is_one() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Cset)
            .op(h.r("x0"))
            .with_cond(Cond::Al),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x0"), 1);
}

#[test]
fn csetm_is_all_ones() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Csetm)
            .op(h.r("w0"))
            .with_cond(Cond::Ne),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_flag("cpsr_z", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 0xffff_ffff);
}

#[test]
fn csinc_increments_on_false() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Csinc)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .with_cond(Cond::Eq),
        ret(0x1004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 100);
    m.set_reg("x2", 200);
    m.set_flag("cpsr_z", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 201);
}

// ---- multiplies ------------------------------------------------------

#[test]
fn mul_madd_msub_mneg() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x1000, Mnemonic::Madd)
            .op(h.r("x0"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .op(h.r("x3")),
        MachInst::new(0x1004, Mnemonic::Msub)
            .op(h.r("x4"))
            .op(h.r("x1"))
            .op(h.r("x2"))
            .op(h.r("x3")),
        MachInst::new(0x1008, Mnemonic::Mneg)
            .op(h.r("x5"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        MachInst::new(0x100c, Mnemonic::Mul)
            .op(h.r("x6"))
            .op(h.r("x1"))
            .op(h.r("x2")),
        ret(0x1010),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 3);
    m.set_reg("x2", 4);
    m.set_reg("x3", 5);
    m.run(func);
    assert_eq!(m.reg("x0"), 17);
    assert_eq!(m.reg("x4"), (-7i64) as u64);
    assert_eq!(m.reg("x5"), (-12i64) as u64);
    assert_eq!(m.reg("x6"), 12);
}

// ---- control flow ----------------------------------------------------

#[test]
fn cbnz_taken_and_not_taken() {
    let h = Harness::new();
    let insts = [
        MachInst::new(0x1000, Mnemonic::Cbnz)
            .op(h.r("x1"))
            .op(Operand::Label(0x100c)),
        MachInst::new(0x1004, Mnemonic::Mov).op(h.r("x0")).op(1i64),
        ret(0x1008),
        MachInst::new(0x100c, Mnemonic::Mov).op(h.r("x0")).op(2i64),
        ret(0x1010),
    ];

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 5);
    m.run(func);
    assert_eq!(m.reg("x0"), 2);

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0);
    m.run(func);
    assert_eq!(m.reg("x0"), 1);
}

#[test]
fn tbnz_tests_single_bit() {
    let h = Harness::new();
    let insts = [
        MachInst::new(0x1000, Mnemonic::Tbnz)
            .op(h.r("x1"))
            .op(63i64)
            .op(Operand::Label(0x100c)),
        MachInst::new(0x1004, Mnemonic::Mov).op(h.r("x0")).op(1i64),
        ret(0x1008),
        MachInst::new(0x100c, Mnemonic::Mov).op(h.r("x0")).op(2i64),
        ret(0x1010),
    ];

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x8000_0000_0000_0000);
    m.run(func);
    assert_eq!(m.reg("x0"), 2);

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0x7fff_ffff_ffff_ffff);
    m.run(func);
    assert_eq!(m.reg("x0"), 1);
}

#[test]
fn b_cond_uses_flags() {
    let h = Harness::new();
    let insts = [
        MachInst::new(0x1000, Mnemonic::B)
            .op(Operand::Label(0x100c))
            .with_cond(Cond::Ne),
        MachInst::new(0x1004, Mnemonic::Mov).op(h.r("x0")).op(1i64),
        ret(0x1008),
        MachInst::new(0x100c, Mnemonic::Mov).op(h.r("x0")).op(2i64),
        ret(0x1010),
    ];

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_flag("cpsr_z", false);
    m.run(func);
    assert_eq!(m.reg("x0"), 2);

    let (module, func) = h.lift(&insts);
    let mut m = Machine::new(&module);
    m.set_flag("cpsr_z", true);
    m.run(func);
    assert_eq!(m.reg("x0"), 1);
}

#[test]
fn bl_writes_link_register_and_calls() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x2000, Mnemonic::Bl).op(Operand::Label(0x3000)),
        ret(0x2004),
    ]);
    let mut m = Machine::new(&module);
    m.run(func);
    assert_eq!(m.reg("x30"), 0x2004);
    assert_eq!(m.calls.len(), 1);
    assert_eq!(m.calls[0].0, "0x3000");
}

#[test]
fn blr_calls_through_register() {
    let h = Harness::new();
    let (module, func) = h.lift(&[
        MachInst::new(0x2000, Mnemonic::Blr).op(h.r("x2")),
        ret(0x2004),
    ]);
    let mut m = Machine::new(&module);
    m.set_reg("x2", 0x1234_5678_9abc_def0);
    m.run(func);
    assert_eq!(m.reg("x30"), 0x2004);
    assert_eq!(m.calls.len(), 1);
    assert_eq!(m.calls[0].0, "0x123456789abcdef0");
}

#[test]
fn br_leaves_through_branch_intrinsic() {
    let h = Harness::new();
    let (module, func) = h.lift(&[MachInst::new(0x2000, Mnemonic::Br).op(h.r("x1"))]);
    let mut m = Machine::new(&module);
    m.set_reg("x1", 0xcafe_babe);
    m.run(func);
    assert_eq!(m.calls.len(), 1);
    assert_eq!(m.calls[0].0, "branch");
    assert_eq!(m.calls[0].1, vec![0xcafe_babe]);
    // The link register is untouched.
    assert_eq!(m.reg("x30"), 0);
}

#[test]
fn bl_to_known_symbol_is_direct_call() {
    let abi = Abi::with_default_conv(Arch::Aarch64);
    let mut module = Module::new();
    let callee = {
        let mut lifter = Lifter::new(&mut module, &abi).unwrap();
        lifter
            .lift_function("callee", &[MachInst::new(0x3000, Mnemonic::Ret)])
            .unwrap()
    };
    let mut lifter = Lifter::new(&mut module, &abi).unwrap();
    lifter.add_symbol(0x3000, callee);
    let caller = lifter
        .lift_function(
            "caller",
            &[
                MachInst::new(0x2000, Mnemonic::Bl).op(Operand::Label(0x3000)),
                MachInst::new(0x2004, Mnemonic::Ret),
            ],
        )
        .unwrap();

    let mut m = Machine::new(&module);
    m.run(caller);
    assert_eq!(m.calls.len(), 1);
    assert_eq!(m.calls[0].0, "callee");
}
