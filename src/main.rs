//! kerneljit - compile and run JIT kernels from the command line
//!
//! # Usage
//!
//! ```bash
//! # Report whether an accelerator can be bound
//! kerneljit info --device 0
//!
//! # Compile a kernel and show the compiler log on failure
//! kerneljit check add1.cu --name add1
//!
//! # Compile, stage zero-filled buffers, execute and print the result
//! kerneljit run sum.cu --name sum --m 4 --n 4 --dtype f32 --scalars 1.5
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, LevelFilter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use kerneljit_gpu::{
    AggregationKind, ContextConfig, Device, DevicePtr, Element, ExecutionRequest, KernelContext,
};

#[derive(Parser)]
#[command(name = "kerneljit")]
#[command(version = "0.1.0")]
#[command(about = "JIT kernel compiler and dispatcher", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show accelerator availability
    Info {
        /// Device ordinal to bind
        #[arg(long, default_value = "0")]
        device: u32,
    },

    /// Compile a kernel without running it
    Check {
        /// Path to the kernel source
        file: PathBuf,

        /// Entry point name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,

        /// Aggregation kind, overriding the source directive
        #[arg(long)]
        aggregation: Option<AggregationKind>,

        /// Device ordinal to bind
        #[arg(long, default_value = "0")]
        device: u32,

        /// Context configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compile a kernel and execute it once on zero-filled buffers
    Run {
        /// Path to the kernel source
        file: PathBuf,

        /// Entry point name
        #[arg(long)]
        name: String,

        /// Rows
        #[arg(long)]
        m: u32,

        /// Columns
        #[arg(long)]
        n: u32,

        /// Element type
        #[arg(long, value_enum, default_value = "f64")]
        dtype: Dtype,

        /// Comma separated scalar arguments
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        scalars: Vec<f64>,

        /// Device ordinal to bind
        #[arg(long, default_value = "0")]
        device: u32,

        /// Context configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dtype {
    F32,
    F64,
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    });

    let result = match cli.command {
        Commands::Info { device } => show_info(device),
        Commands::Check {
            file,
            name,
            aggregation,
            device,
            config,
        } => check_kernel(file, name, aggregation, device, config),
        Commands::Run {
            file,
            name,
            m,
            n,
            dtype,
            scalars,
            device,
            config,
        } => run_kernel(file, name, m, n, dtype, scalars, device, config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(level: LevelFilter) {
    // RUST_LOG still wins over the command line level.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:5}] {}:{} - {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}

fn open_context(device: u32, config: Option<&Path>) -> Result<KernelContext, String> {
    let config = ContextConfig::load(config).map_err(|e| e.to_string())?;
    debug!("context config: {:?}", config);
    KernelContext::initialize_with_config(device, &config).map_err(|e| e.to_string())
}

fn read_source(file: &Path) -> Result<String, String> {
    std::fs::read_to_string(file).map_err(|e| format!("Failed to read {}: {}", file.display(), e))
}

fn show_info(device: u32) -> Result<(), String> {
    println!("kerneljit v0.1.0");

    #[cfg(feature = "cuda-backend")]
    println!("  ✓ CUDA backend");

    #[cfg(not(feature = "cuda-backend"))]
    println!("  ✗ CUDA backend (not enabled)");

    if !KernelContext::is_available() {
        println!("  No accelerator available");
        return Ok(());
    }

    let ctx = open_context(device, None)?;
    println!("  Device {}: {}", ctx.device_id(), ctx.device().name());
    println!("  Max threads per block: {}", ctx.max_threads_per_block());
    ctx.destroy(device).map_err(|e| e.to_string())
}

fn check_kernel(
    file: PathBuf,
    name: Option<String>,
    aggregation: Option<AggregationKind>,
    device: u32,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let source = read_source(&file)?;
    let name = match name {
        Some(name) => name,
        None => file
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| format!("Cannot derive a kernel name from {}", file.display()))?,
    };

    let ctx = open_context(device, config.as_deref())?;
    let kind = match aggregation {
        Some(kind) => ctx
            .compile_with_aggregation(&name, &source, kind)
            .map(|_| kind),
        None => ctx.compile(&name, &source),
    }
    .map_err(|e| e.to_string())?;

    println!("✓ {} compiled (aggregation {})", name, kind);
    ctx.destroy(device).map_err(|e| e.to_string())
}

#[allow(clippy::too_many_arguments)]
fn run_kernel(
    file: PathBuf,
    name: String,
    m: u32,
    n: u32,
    dtype: Dtype,
    scalars: Vec<f64>,
    device: u32,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let source = read_source(&file)?;
    let ctx = open_context(device, config.as_deref())?;
    let kind = ctx.compile(&name, &source).map_err(|e| e.to_string())?;
    debug!("{} compiled with aggregation {}", name, kind);

    let result = match dtype {
        Dtype::F64 => run_typed::<f64>(&ctx, &name, m, n, &scalars),
        Dtype::F32 => {
            let scalars: Vec<f32> = scalars.iter().map(|&s| s as f32).collect();
            run_typed::<f32>(&ctx, &name, m, n, &scalars)
        }
    };
    let destroyed = ctx.destroy(device).map_err(|e| e.to_string());
    result?;
    destroyed
}

/// Stage a zero-filled input and output of `m * n` elements, execute once and
/// print the return value and output.
fn run_typed<T: Element + std::fmt::Display>(
    ctx: &KernelContext,
    name: &str,
    m: u32,
    n: u32,
    scalars: &[T],
) -> Result<(), String> {
    let device = ctx.device();
    let len = m as usize * n as usize;
    let zeros = T::slice_to_bytes(&vec![T::zero(); len]);

    let input = RunBuffer::new(device, &zeros)?;
    let output = RunBuffer::new(device, &zeros)?;

    let inputs = [input.ptr];
    let request = ExecutionRequest::new(name, m, n)
        .inputs(&inputs)
        .output(output.ptr)
        .scalars(scalars);
    let value = ctx.execute(&request).map_err(|e| e.to_string())?;

    let mut bytes = vec![0u8; zeros.len()];
    device
        .copy_from_device(&mut bytes, output.ptr)
        .map_err(|e| e.to_string())?;
    let values: Vec<String> = bytes
        .chunks_exact(T::TYPE.byte_size())
        .filter_map(T::from_bytes)
        .map(|v| v.to_string())
        .collect();

    println!("result: {}", value);
    println!("output: [{}]", values.join(", "));
    Ok(())
}

/// Device buffer owned by the CLI for the duration of one run.
struct RunBuffer<'d> {
    device: &'d dyn Device,
    ptr: DevicePtr,
}

impl<'d> RunBuffer<'d> {
    fn new(device: &'d dyn Device, bytes: &[u8]) -> Result<Self, String> {
        // Zero-sized launches still get a distinct allocation.
        let ptr = device
            .alloc(bytes.len().max(1))
            .map_err(|e| e.to_string())?;
        let staged = RunBuffer { device, ptr };
        if !bytes.is_empty() {
            device
                .copy_to_device(ptr, bytes)
                .map_err(|e| e.to_string())?;
        }
        Ok(staged)
    }
}

impl Drop for RunBuffer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.free(self.ptr) {
            log::warn!("failed to free run buffer: {}", e);
        }
    }
}
