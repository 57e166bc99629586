use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use oif_core::{Arg, ArrayF64, LanguageBackend};
use oif_julia::{JuliaBackend, JuliaConfig};
use tracing_subscriber::{EnvFilter, fmt};

const LOCAL_CONFIG: &str = "oif-julia.toml";

#[derive(Parser)]
#[command(
    name = "oif-call",
    about = "Call a method of an Open Interfaces implementation written in Julia"
)]
struct Cli {
    /// Config file (defaults to ./oif-julia.toml, then <config dir>/oif/julia.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to libjulia, overriding the config
    #[arg(long)]
    library: Option<String>,

    /// Implementation tree that descriptor paths are relative to
    #[arg(long)]
    impl_root: Option<PathBuf>,

    /// Implementation descriptor: "<source-path> <module>"
    descriptor: String,

    /// Method to call
    method: String,

    /// Float64 input argument, in order (repeatable)
    #[arg(long = "arg", allow_negative_numbers = true)]
    args: Vec<f64>,

    /// Length of a zero-filled Float64 output array (repeatable)
    #[arg(long = "out-array")]
    out_arrays: Vec<usize>,

    /// Print outputs as JSON
    #[arg(long)]
    json: bool,
}

fn load_config(cli: &Cli) -> Result<JuliaConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => [Some(PathBuf::from(LOCAL_CONFIG)), JuliaConfig::default_path()]
            .into_iter()
            .flatten()
            .find(|p| p.is_file()),
    };

    let mut config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading config");
            JuliaConfig::from_file(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => JuliaConfig::default(),
    }
    .with_env_overrides();

    if let Some(library) = &cli.library {
        config.runtime.library = library.clone();
    }
    if let Some(root) = &cli.impl_root {
        config.implementation.root = root.clone();
    }
    Ok(config)
}

fn print_outputs(outputs: &[Vec<f64>], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&serde_json::json!({ "outputs": outputs }))?);
    } else {
        for values in outputs {
            let line: Vec<String> = values.iter().map(f64::to_string).collect();
            println!("{}", line.join(" "));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so they don't mix with results on stdout
    fmt()
        .with_env_filter(EnvFilter::from_env("OIF_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.descriptor.trim().is_empty() {
        bail!("descriptor must not be empty");
    }

    let config = load_config(&cli)?;
    tracing::info!(
        library = %config.runtime.library,
        impl_root = %config.implementation.root.display(),
        "Starting oif-call"
    );

    let mut backend = JuliaBackend::from_config(&config)
        .with_context(|| format!("failed to open {}", Path::new(&config.runtime.library).display()))?;

    let handle = backend
        .load(&cli.descriptor, 1, 0)
        .with_context(|| format!("failed to load {:?}", cli.descriptor))?;

    let mut buffers: Vec<Vec<f64>> = cli.out_arrays.iter().map(|len| vec![0.0; *len]).collect();
    let call_result = {
        let inputs: Vec<Arg<'_>> = cli.args.iter().map(|v| Arg::Float64(*v)).collect();
        let outputs: Vec<Arg<'_>> = buffers
            .iter_mut()
            .map(|buf| Arg::ArrayF64(ArrayF64::from_slice(buf)))
            .collect();
        backend.call(&handle, &cli.method, &inputs, &outputs)
    };

    let unload_result = backend.unload(handle);
    call_result.with_context(|| format!("call to {:?} failed", cli.method))?;
    unload_result.context("failed to unload implementation")?;

    print_outputs(&buffers, cli.json)
}
