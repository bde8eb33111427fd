//! The IR module: an ordered collection of functions plus the global
//! location store.

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{function::Function, global::GlobalStore};

/// An opaque reference to a [`Function`] in a [`Module`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "func");

#[derive(Debug, Default)]
pub struct Module {
    pub funcs: PrimaryMap<FuncRef, Function>,
    pub globals: GlobalStore,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_function(&mut self, name: &str) -> FuncRef {
        self.funcs.push(Function::new(name))
    }

    pub fn iter_functions(&self) -> impl Iterator<Item = FuncRef> {
        self.funcs.keys()
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncRef> {
        self.funcs
            .iter()
            .find(|(_, func)| func.name == name)
            .map(|(func_ref, _)| func_ref)
    }
}
