//! Nanotube compiler core.
//!
//! Lowers a pointer-based packet-processing program into an explicit
//! request/response program over the Nanotube API: the setup function is
//! interpreted at compile time into a system topology, and each kernel or
//! thread function runs through converge, memory-to-request lowering,
//! request merging and HLS validation.

#![forbid(unsafe_code)]

pub mod analysis;
pub mod error;
pub mod intrinsics;
pub mod ir;
pub mod passes;
pub mod setup;

pub use error::{CompileError, Result};

use passes::{CodeMetrics, PipelineOptions};
use setup::SetupFunc;

/// Top-level compile options, mapped from the driver's CLI surface.
#[derive(Clone)]
pub struct CompileOptions {
    pub pipeline: PipelineOptions,
    /// Reject tap-internal calls in the setup function.
    pub strict_setup: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { pipeline: PipelineOptions::default(), strict_setup: true }
    }
}

/// The result of a whole-module compile: the interpreted setup function
/// and per-kernel diagnostics.  The module itself is rewritten in place.
pub struct CompileOutput {
    pub setup: SetupFunc,
    pub kernel_metrics: Vec<(String, CodeMetrics)>,
}

/// Interpret the setup function and run the pass pipeline over every
/// kernel and thread function.
pub fn compile(module: &mut ir::Module, options: &CompileOptions) -> Result<CompileOutput> {
    let setup = SetupFunc::interpret(module, options.strict_setup)?;
    let kernel_metrics = passes::run_pipeline(module, &setup.topology, &options.pipeline)?;
    Ok(CompileOutput { setup, kernel_metrics })
}
