//! External type declarations.
//!
//! Stand-in for debug-info and library-type providers: a per-module table
//! mapping function names to declared signatures. Declarations override
//! inference; conflicts surface as warnings.

use indexmap::IndexMap;
use relift_ir::Type;
use smol_str::SmolStr;

/// A declared function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDecl {
    pub params: Vec<Type>,
    pub ret: Type,
    pub variadic: bool,
    /// Index of the format-string parameter for printf-like functions;
    /// drives variadic argument inference.
    pub format_arg: Option<usize>,
}

impl FuncDecl {
    pub fn new(params: &[Type], ret: Type) -> Self {
        Self {
            params: params.to_vec(),
            ret,
            variadic: false,
            format_arg: None,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Marks parameter `idx` as the format string.
    pub fn format_string_at(mut self, idx: usize) -> Self {
        self.format_arg = Some(idx);
        self.variadic = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct TypeHints {
    decls: IndexMap<SmolStr, FuncDecl>,
}

impl TypeHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, decl: FuncDecl) {
        self.decls.insert(name.into(), decl);
    }

    pub fn get(&self, name: &str) -> Option<&FuncDecl> {
        self.decls.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}
