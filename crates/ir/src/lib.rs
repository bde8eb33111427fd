//! The relift low-level IR.
//!
//! A register-and-memory style IR for decompilation: freshly lifted
//! functions take no parameters and return nothing, communicating only
//! through global register locations and stack slots. The param/return pass
//! rewrites this into explicitly typed signatures and call sites.

pub mod builder;
pub mod cfg;
pub mod dfg;
pub mod function;
pub mod global;
pub mod inst;
pub mod layout;
pub mod module;
pub mod types;
pub mod value;
pub mod write;

pub use builder::FuncBuilder;
pub use cfg::ControlFlowGraph;
pub use dfg::{Block, BlockId, DataFlowGraph};
pub use function::{Function, Signature};
pub use global::{GlobalData, GlobalId, GlobalRole, GlobalStore, Init};
pub use inst::{BinaryOp, CallTarget, CastOp, CmpPred, InstData, InstId, UnaryOp};
pub use layout::Layout;
pub use module::{FuncRef, Module};
pub use types::{Elem, Type};
pub use value::{Imm, Value, ValueId};
pub use write::{display_func, display_module};
