//! Binding of ABI registers to IR global locations.
//!
//! One global is materialized per *parent* register; sub-register accesses
//! go through their parent with explicit truncation/extension. Globals are
//! found by register name, so a module prepared elsewhere (or by hand in
//! tests) binds the same way.

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use relift_abi::{Abi, Reg, RegClass};
use relift_ir::{GlobalData, GlobalId, GlobalRole, Module, Type};

/// The IR element type backing a register of the given class and width.
pub fn global_type(class: RegClass, bits: u16) -> Type {
    match class {
        RegClass::Flag => Type::I1,
        RegClass::Fpr => match bits {
            32 => Type::F32,
            64 => Type::F64,
            // Vector and x87 registers are carried as wide integers.
            _ => Type::I128,
        },
        _ => Type::int(bits).unwrap_or(Type::I64),
    }
}

/// Ensures every parent register of `abi` has a global in `module`, and
/// returns the resolved map.
pub fn bind_registers(module: &mut Module, abi: &Abi) -> RegMap {
    let bank = abi.bank();
    let mut map = RegMap::default();

    for reg in bank.parents() {
        let data = bank.data(reg);
        let gv = match module.globals.by_name(&data.name) {
            Some(gv) => gv,
            None => {
                let role = match data.class {
                    RegClass::Flag => GlobalRole::Flag,
                    RegClass::Sp => GlobalRole::StackPointer,
                    _ => GlobalRole::Register,
                };
                module.globals.make_global(GlobalData {
                    name: data.name.clone(),
                    ty: global_type(data.class, data.bits),
                    role: Some(role),
                    init: None,
                })
            }
        };
        map.bound[reg] = gv.into();
    }
    map
}

/// Parent register -> global location.
#[derive(Debug, Default)]
pub struct RegMap {
    bound: SecondaryMap<Reg, PackedOption<GlobalId>>,
}

impl RegMap {
    /// The global backing `reg`'s parent register.
    pub fn global(&self, abi: &Abi, reg: Reg) -> GlobalId {
        let parent = abi.parent_of(reg);
        self.bound[parent].expand().expect("register not bound")
    }
}
