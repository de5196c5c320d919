//! Function-level analyses shared by the transform passes.

pub mod alias;
pub mod pointer;
pub mod scaled;

pub use alias::{get_memory_location, max_value, MemoryLocation};
pub use pointer::{PointerAnalysis, PointerInfo, PointerKind};
pub use scaled::{strip_all_constants, ScaledValue};
