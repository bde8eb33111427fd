//! Global locations: the register file and other module-level storage.
//!
//! Lifted code communicates exclusively through these locations until the
//! param/return pass recovers real signatures. A global's optional role
//! records what the ABI knows about it.

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::Type;

/// An opaque reference to a [`GlobalData`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub u32);
entity_impl!(GlobalId, "gv");

/// The semantic role the ABI assigns to a global location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRole {
    /// A machine register.
    Register,
    /// A condition flag bit.
    Flag,
    /// The stack pointer.
    StackPointer,
}

/// Static initializer of a global location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Init {
    /// A NUL-free string constant, e.g. a format string pulled out of the
    /// image.
    Str(String),
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: SmolStr,
    /// Element type of the location; loads and stores see this type.
    pub ty: Type,
    pub role: Option<GlobalRole>,
    pub init: Option<Init>,
}

#[derive(Debug, Default)]
pub struct GlobalStore {
    globals: PrimaryMap<GlobalId, GlobalData>,
    by_name: FxHashMap<SmolStr, GlobalId>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_global(&mut self, data: GlobalData) -> GlobalId {
        debug_assert!(
            !self.by_name.contains_key(&data.name),
            "global `{}` is already defined",
            data.name
        );
        let name = data.name.clone();
        let gv = self.globals.push(data);
        self.by_name.insert(name, gv);
        gv
    }

    /// Declares a plain (role-less, uninitialized) global.
    pub fn declare(&mut self, name: &str, ty: Type) -> GlobalId {
        self.make_global(GlobalData {
            name: name.into(),
            ty,
            role: None,
            init: None,
        })
    }

    pub fn data(&self, gv: GlobalId) -> &GlobalData {
        &self.globals[gv]
    }

    pub fn ty(&self, gv: GlobalId) -> Type {
        self.globals[gv].ty
    }

    pub fn role(&self, gv: GlobalId) -> Option<GlobalRole> {
        self.globals[gv].role
    }

    pub fn by_name(&self, name: &str) -> Option<GlobalId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, &GlobalData)> {
        self.globals.iter()
    }

    /// The string initializer of `gv`, if it has one.
    pub fn str_init(&self, gv: GlobalId) -> Option<&str> {
        match &self.globals[gv].init {
            Some(Init::Str(s)) => Some(s),
            None => None,
        }
    }
}
