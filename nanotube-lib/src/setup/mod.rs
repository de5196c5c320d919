//! Compile-time interpretation of the setup function.
//!
//! The setup routine runs once, at compile time, under an abstract
//! interpreter: branches must be constant, PHIs resolve against the block
//! executed last, and memory is a byte-precise region map.  The result is
//! the system topology every later pass consumes.

pub mod memory;
pub mod topology;
pub mod value;

mod builder;

pub use builder::{SetupFunc, SetupTracer};
pub use memory::{AllocSource, Allocation, SetupMemory};
pub use topology::{
    ChannelExportType, ChannelInfo, ContextInfo, KernelInfo, MapInfo, MapOpKind, MapType,
    StagePort, ThreadInfo, Topology,
};
pub use value::SetupValue;

/// The well-known name of the setup function.
pub const SETUP_FUNCTION_NAME: &str = "nanotube_setup";
