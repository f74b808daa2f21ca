// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! kdispatch command line: plan tiled launches, inspect matmul configs and
//! drive the CPU matmul dispatcher.

use std::ffi::c_void;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kdispatch::config::{FusedOp, MatmulConfig, Settings};
use kdispatch::exec::ConfigBuffer;
use kdispatch::fusion::FusionNode;
use kdispatch::memref::MemrefHandle;
use kdispatch::pipeline::plan_fusion;
use kdispatch::runtime::{DeviceDescription, RunOptions};
use kdispatch::types::{parse_dims, DType, TensorType};

#[derive(Parser, Debug)]
#[command(author, version, about = "Backend kernel dispatch tooling", long_about = None)]
struct Cli {
    /// Settings file (defaults to the nearest Kdispatch.toml).
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the emitter for a fusion and print its launch configuration.
    Plan {
        /// Output shape of the fusion root, e.g. 125x127.
        #[arg(long)]
        shape: String,
        /// Element type of the fusion root.
        #[arg(long, default_value = "f32")]
        dtype: String,
        /// Backend config JSON, or @PATH to read it from a file.
        #[arg(long, value_name = "JSON")]
        backend_config: String,
        /// Device preset, overriding the settings file.
        #[arg(long)]
        device: Option<String>,
        /// Fusion name reported in diagnostics.
        #[arg(long, default_value = "fusion")]
        name: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },
    /// Encode a matmul config and print it as hex.
    EncodeConfig {
        /// Fused post-op to request (repeatable).
        #[arg(long = "fuse", value_name = "OP")]
        fused_ops: Vec<String>,
        #[arg(long)]
        transpose_lhs: bool,
        #[arg(long)]
        transpose_rhs: bool,
    },
    /// Decode a hex matmul config.
    DecodeConfig {
        #[arg(value_name = "HEX")]
        hex: String,
    },
    /// Run the CPU matmul dispatcher on generated operands.
    Matmul {
        #[arg(long)]
        m: u64,
        #[arg(long)]
        k: u64,
        #[arg(long)]
        n: u64,
        #[arg(long, default_value_t = 1)]
        batch: u64,
        /// Intra-op worker count (defaults to the settings file).
        #[arg(long)]
        threads: Option<usize>,
        /// Fused post-op to request (repeatable); the dispatcher rejects these.
        #[arg(long = "fuse", value_name = "OP")]
        fused_ops: Vec<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn main() {
    let filter =
        EnvFilter::try_from_env("KDISPATCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Plan {
            shape,
            dtype,
            backend_config,
            device,
            name,
            format,
        } => run_plan(&cli, shape, dtype, backend_config, device.as_deref(), name, *format),
        Command::EncodeConfig {
            fused_ops,
            transpose_lhs,
            transpose_rhs,
        } => run_encode(fused_ops, *transpose_lhs, *transpose_rhs),
        Command::DecodeConfig { hex } => run_decode(hex),
        Command::Matmul {
            m,
            k,
            n,
            batch,
            threads,
            fused_ops,
        } => run_matmul(&cli, [*batch, *m, *k, *n], *threads, fused_ops),
    };

    if let Err(err) = outcome {
        eprintln!("error[kdispatch]: {err:#}");
        process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    if let Some(path) = &cli.settings {
        return Settings::load(path);
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(Settings::discover(&cwd)?
        .map(|(_, settings)| settings)
        .unwrap_or_default())
}

fn resolve_device(cli: &Cli, preset: Option<&str>) -> Result<DeviceDescription> {
    let mut settings = load_settings(cli)?;
    if let Some(preset) = preset {
        settings.device.preset = Some(preset.to_string());
    }
    settings.device_description()
}

fn run_plan(
    cli: &Cli,
    shape: &str,
    dtype: &str,
    backend_config: &str,
    device: Option<&str>,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let dims = match parse_dims(shape) {
        Some(dims) => dims,
        None => bail!("invalid shape '{shape}' (expected e.g. 125x127)"),
    };
    let dtype = match DType::parse(dtype) {
        Some(dtype) => dtype,
        None => bail!("unknown dtype '{dtype}'"),
    };
    let config_text = match backend_config.strip_prefix('@') {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?
        }
        None => backend_config.to_string(),
    };
    let device = resolve_device(cli, device)?;

    let node = FusionNode::new(name, TensorType::with_dims(dtype, &dims), config_text);
    let plan = plan_fusion(&node, &device)?;

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "fusion": name,
                "kind": plan.kind().as_str(),
                "device": device.name,
                "launch_config": plan.launch_config,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Human => {
            println!("fusion: {name} ({})", node.output);
            println!("emitter: {}", plan.kind());
            println!("device: {}", device.name);
            match &plan.launch_config {
                Some(config) => {
                    println!("launch: {}", config.launch_dimensions);
                    let params = &config.block_level_parameters;
                    println!(
                        "tiles: {:?}, warps: {}, ctas: {}, stages: {}",
                        params.output_tile_sizes, params.num_warps, params.num_ctas, params.num_stages
                    );
                }
                None => println!("launch: none"),
            }
        }
    }
    Ok(())
}

fn parse_fused_ops(names: &[String]) -> Result<Vec<FusedOp>> {
    names
        .iter()
        .map(|name| name.parse::<FusedOp>().map_err(anyhow::Error::msg))
        .collect()
}

fn run_encode(fused_ops: &[String], transpose_lhs: bool, transpose_rhs: bool) -> Result<()> {
    let config = MatmulConfig {
        fused_ops: parse_fused_ops(fused_ops)?,
        transpose_lhs,
        transpose_rhs,
    };
    println!("{}", hex::encode(config.encode()));
    Ok(())
}

fn run_decode(text: &str) -> Result<()> {
    let bytes = hex::decode(text.trim()).context("config is not valid hex")?;
    let config = MatmulConfig::decode(&bytes)?;
    let ops: Vec<&str> = config.fused_ops.iter().map(|op| op.as_str()).collect();
    println!("fused_ops: [{}]", ops.join(", "));
    println!("transpose_lhs: {}", config.transpose_lhs);
    println!("transpose_rhs: {}", config.transpose_rhs);
    Ok(())
}

fn element_count(dims: &[u64]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
        .with_context(|| format!("operand shape {dims:?} has too many elements"))
}

fn run_matmul(
    cli: &Cli,
    [batch, m, k, n]: [u64; 4],
    threads: Option<usize>,
    fused_ops: &[String],
) -> Result<()> {
    let lhs_len = element_count(&[batch, m, k])?;
    let rhs_len = element_count(&[batch, k, n])?;
    let out_len = element_count(&[batch, m, n])?;
    let mut settings = load_settings(cli)?;
    if let Some(threads) = threads {
        settings.cpu.intra_op_threads = threads;
    }
    let pool = settings.build_thread_pool()?;
    let config = MatmulConfig {
        fused_ops: parse_fused_ops(fused_ops)?,
        ..MatmulConfig::plain()
    }
    .encode();

    let fill = |len: usize, seed: usize| -> Vec<f32> {
        (0..len).map(|i| ((i % 13 * 7 + seed) % 13) as f32 - 6.0).collect()
    };
    let mut lhs = fill(lhs_len, 1);
    let mut rhs = fill(rhs_len, 5);
    let mut out = vec![0.0f32; out_len];

    {
        let lhs = MemrefHandle::new(&mut lhs, &[batch, m, k]);
        let rhs = MemrefHandle::new(&mut rhs, &[batch, k, n]);
        let dst = MemrefHandle::new(&mut out, &[batch, m, n]);
        let options = RunOptions::new().with_intra_op_thread_pool(&pool);
        let config = ConfigBuffer::from_slice(&config);
        // SAFETY: every handle outlives the call and the output does not alias
        // the inputs.
        unsafe {
            kdispatch::kd_cpu_runtime_matmul(
                &options as *const RunOptions<'_> as *const c_void,
                lhs.as_raw(),
                rhs.as_raw(),
                dst.as_raw(),
                &config as *const ConfigBuffer as *const c_void,
            );
        }
    }

    let checksum: f64 = out.iter().map(|&v| v as f64).sum();
    println!(
        "matmul {batch}x{m}x{k} * {batch}x{k}x{n} on {} threads: checksum {checksum}",
        pool.current_num_threads()
    );
    Ok(())
}
