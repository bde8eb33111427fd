//! The register universe of one architecture.
//!
//! Registers form a forest: every sub-register points at the next wider
//! alias (`w1` -> `x1`, `al` -> `ax` -> `eax`). Analyses track locations at
//! parent-register granularity, so [`RegBank::parent_of`] resolves any
//! register to its widest alias.

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

/// An opaque reference to a register of one [`RegBank`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(u32);
entity_impl!(Reg, "reg");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// General purpose register.
    Gpr,
    /// Floating point / vector register.
    Fpr,
    /// A single condition flag bit.
    Flag,
    /// The stack pointer.
    Sp,
    /// The link register.
    Lr,
    /// The program counter.
    Pc,
}

#[derive(Debug, Clone)]
pub struct RegData {
    pub name: SmolStr,
    pub bits: u16,
    pub class: RegClass,
    /// The next wider alias, if this is a sub-register.
    pub parent: PackedOption<Reg>,
}

#[derive(Debug, Default)]
pub struct RegBank {
    regs: PrimaryMap<Reg, RegData>,
    by_name: FxHashMap<SmolStr, Reg>,
}

impl RegBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a full-width register.
    pub fn add(&mut self, name: &str, bits: u16, class: RegClass) -> Reg {
        self.add_data(RegData {
            name: name.into(),
            bits,
            class,
            parent: None.into(),
        })
    }

    /// Registers a sub-register aliasing `parent`.
    pub fn add_sub(&mut self, name: &str, bits: u16, parent: Reg) -> Reg {
        debug_assert!(bits < self.regs[parent].bits);
        let class = self.regs[parent].class;
        self.add_data(RegData {
            name: name.into(),
            bits,
            class,
            parent: parent.into(),
        })
    }

    fn add_data(&mut self, data: RegData) -> Reg {
        debug_assert!(
            !self.by_name.contains_key(&data.name),
            "register `{}` is already defined",
            data.name
        );
        let name = data.name.clone();
        let reg = self.regs.push(data);
        self.by_name.insert(name, reg);
        reg
    }

    pub fn data(&self, reg: Reg) -> &RegData {
        &self.regs[reg]
    }

    pub fn name(&self, reg: Reg) -> &SmolStr {
        &self.regs[reg].name
    }

    pub fn bits(&self, reg: Reg) -> u16 {
        self.regs[reg].bits
    }

    pub fn class(&self, reg: Reg) -> RegClass {
        self.regs[reg].class
    }

    /// Looks a register up by its architectural name.
    pub fn by_name(&self, name: &str) -> Option<Reg> {
        self.by_name.get(name).copied()
    }

    /// Resolves `reg` to its widest alias. Full-width registers resolve to
    /// themselves.
    pub fn parent_of(&self, reg: Reg) -> Reg {
        let mut cur = reg;
        while let Some(parent) = self.regs[cur].parent.expand() {
            cur = parent;
        }
        cur
    }

    pub fn is_sub_register(&self, reg: Reg) -> bool {
        self.regs[reg].parent.is_some()
    }

    /// All registers, sub-registers included.
    pub fn iter(&self) -> impl Iterator<Item = (Reg, &RegData)> {
        self.regs.iter()
    }

    /// Full-width registers only.
    pub fn parents(&self) -> impl Iterator<Item = Reg> + '_ {
        self.regs
            .iter()
            .filter(|(_, data)| data.parent.is_none())
            .map(|(reg, _)| reg)
    }
}
