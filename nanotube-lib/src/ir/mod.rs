//! The SSA substrate the passes operate on: typed values, basic blocks,
//! functions and globals, with arena-index references throughout so pass
//! side-tables can key on stable ids.

pub mod apint;
pub mod builder;
pub mod cfg;
pub mod function;
pub mod types;

pub use apint::IntValue;
pub use builder::FunctionBuilder;
pub use cfg::{Cfg, DomTree, Reachability};
pub use function::{
    BinOp, Block, BlockId, CastOp, Constant, Function, Global, GlobalId, GlobalInit, ICmpPred,
    Inst, Module, ValueDef, ValueId,
};
pub use types::{DataLayout, Type};
