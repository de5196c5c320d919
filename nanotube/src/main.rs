#![forbid(unsafe_code)]

use clap::Parser;
use nanotube_lib::ir::Module;
use nanotube_lib::passes::{parse_passes, HlsValidateOptions};
use nanotube_lib::{compile, CompileOptions};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Nanotube compiler back-end")]
struct Cli {
    /// Input IR module (JSON)
    input: PathBuf,

    /// Output directory for the transformed module and topology
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: PathBuf,

    /// Overwrite the output directory if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Comma-separated pass pipeline, e.g. "converge,mem2req,optreq,hls"
    #[arg(long, value_name = "PASSES")]
    passes: Option<String>,

    /// Enable the strict HLS protocol checks (can-return on every return,
    /// read-failure before thread_wait)
    #[arg(long)]
    strict_hls: bool,

    /// Tolerate tap-internal calls in the setup function
    #[arg(long)]
    no_strict_setup: bool,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        error!(%err, "compilation failed");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(&cli.input)?;
    let mut module: Module = serde_json::from_str(&text)?;

    let mut options = CompileOptions::default();
    if let Some(passes) = &cli.passes {
        options.pipeline.passes = parse_passes(passes)?;
    }
    options.pipeline.hls = HlsValidateOptions {
        check_can_return: cli.strict_hls,
        check_read_fail: cli.strict_hls,
    };
    options.strict_setup = !cli.no_strict_setup;

    let output = compile(&mut module, &options)?;
    info!(
        contexts = output.setup.topology.contexts.len(),
        channels = output.setup.topology.channels.len(),
        threads = output.setup.topology.threads.len(),
        maps = output.setup.topology.maps.len(),
        kernels = output.setup.topology.kernels.len(),
        "setup function interpreted"
    );

    // No output is written on failure; everything below is success-path.
    if cli.output.exists() {
        if !cli.overwrite {
            return Err(format!(
                "output directory {} exists, use --overwrite to replace it",
                cli.output.display()
            )
            .into());
        }
    } else {
        fs::create_dir_all(&cli.output)?;
    }

    let stem = cli
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let module_path = cli.output.join(format!("{stem}.out.json"));
    fs::write(&module_path, serde_json::to_string_pretty(&module)?)?;
    let topology_path = cli.output.join("topology.json");
    fs::write(&topology_path, serde_json::to_string_pretty(&output.setup.topology)?)?;

    for (kernel, metrics) in &output.kernel_metrics {
        info!(
            %kernel,
            total = metrics.total_weight,
            df_path = metrics.data_flow_critical_path,
            cfg_path = metrics.cfg_critical_path,
            "kernel metrics"
        );
    }
    info!(module = %module_path.display(), topology = %topology_path.display(), "wrote outputs");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
