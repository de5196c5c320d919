//! The IR-to-IR transform pipeline.
//!
//! Per kernel or thread function the order is: pointer analysis (inside
//! mem2req), converge, mem2req, optimise-requests, HLS validation.  The
//! driver can restrict the set with `--passes`.

pub mod converge;
pub mod hls_validate;
pub mod mem2req;
pub mod metrics;
pub mod optimise_requests;

use crate::error::{CompileError, Result};
use crate::ir::Module;
use crate::setup::Topology;
use tracing::{debug, info_span};

pub use hls_validate::HlsValidateOptions;
pub use metrics::CodeMetrics;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Pass {
    Converge,
    Mem2Req,
    OptimiseRequests,
    HlsValidate,
}

impl Pass {
    pub fn name(self) -> &'static str {
        match self {
            Pass::Converge => "converge",
            Pass::Mem2Req => "mem2req",
            Pass::OptimiseRequests => "optreq",
            Pass::HlsValidate => "hls",
        }
    }
}

pub fn default_passes() -> Vec<Pass> {
    vec![Pass::Converge, Pass::Mem2Req, Pass::OptimiseRequests, Pass::HlsValidate]
}

/// Parse a `--passes` list such as `converge,mem2req,optreq,hls`.
pub fn parse_passes(spec: &str) -> Result<Vec<Pass>> {
    let mut out = Vec::new();
    for name in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let pass = match name {
            "converge" => Pass::Converge,
            "mem2req" => Pass::Mem2Req,
            "optreq" | "optimise-requests" => Pass::OptimiseRequests,
            "hls" | "hls-validate" => Pass::HlsValidate,
            other => {
                return Err(CompileError::setup(format!("unknown pass name '{other}'")))
            }
        };
        out.push(pass);
    }
    Ok(out)
}

#[derive(Clone)]
pub struct PipelineOptions {
    pub passes: Vec<Pass>,
    pub hls: HlsValidateOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions { passes: default_passes(), hls: HlsValidateOptions::default() }
    }
}

/// Run the pipeline over every kernel and thread function named by the
/// topology.  Kernel functions additionally get the request merger and a
/// metrics report.
pub fn run_pipeline(
    module: &mut Module,
    topology: &Topology,
    options: &PipelineOptions,
) -> Result<Vec<(String, CodeMetrics)>> {
    let mut kernel_metrics = Vec::new();

    let kernels: Vec<(String, bool)> = topology
        .kernels
        .iter()
        .map(|k| (k.func.clone(), true))
        .chain(topology.threads.iter().map(|t| (t.func.clone(), false)))
        .collect();

    for (func_name, is_kernel) in kernels {
        let idx = module
            .function_index(&func_name)
            .ok_or_else(|| CompileError::MissingFunction(func_name.clone()))?;
        let span = info_span!("pipeline", function = %func_name);
        let _guard = span.enter();
        let f = &mut module.functions[idx];
        let packet = is_kernel.then(|| f.params[1]);

        for pass in &options.passes {
            debug!(pass = pass.name(), "running pass");
            match pass {
                Pass::Converge => {
                    converge::run(f)?;
                }
                Pass::Mem2Req => {
                    mem2req::run(f, packet)?;
                }
                Pass::OptimiseRequests => {
                    if is_kernel {
                        optimise_requests::run(f)?;
                    }
                }
                Pass::HlsValidate => hls_validate::run(f, options.hls)?,
            }
        }

        if is_kernel {
            kernel_metrics.push((func_name, metrics::run(f)));
        }
    }
    Ok(kernel_metrics)
}
