//! wasm-bridge CLI entry point.
//!
//! Embeds a guest module the way a host application would: load it, call
//! one export with typed arguments, and print the result.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasm_bridge_common::{ConfigFile, VmOptions};
use wasm_bridge_embed::{VirtualMachine, parse_cli_value};

#[derive(Parser)]
#[command(name = "wasm-bridge", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// VM options as a JSON object, replacing those of the config file.
    #[arg(long, global = true)]
    options: Option<String>,

    /// Compile ahead of time and reuse cached artifacts.
    #[arg(long, global = true)]
    aot: bool,

    /// Collect instruction statistics.
    #[arg(long, global = true)]
    measure: bool,

    /// Artifact cache directory.
    #[arg(long, global = true, env = "WASM_BRIDGE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the module's command entry point and exit with its code.
    Start(ModuleArgs),
    /// Call an exported function.
    Run {
        #[command(flatten)]
        module: ModuleArgs,
        /// Exported function name.
        function: String,
        /// Arguments as JSON literals; anything else is passed as text.
        args: Vec<String>,
        /// Shape of the result.
        #[arg(long, value_enum, default_value_t = Returns::Void)]
        returns: Returns,
    },
    /// Compile the module to a native artifact.
    Compile {
        #[command(flatten)]
        module: ModuleArgs,
        /// Output path.
        output: PathBuf,
    },
}

#[derive(Args)]
struct ModuleArgs {
    /// Module file (wasm, wat or compiled artifact).
    module: PathBuf,

    /// Load the file into memory and classify it by content.
    #[arg(long)]
    buffer: bool,

    /// Print statistics after the call.
    #[arg(long)]
    stats: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Returns {
    Void,
    I32,
    U32,
    I64,
    U64,
    String,
    Bytes,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wasm_bridge=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_vm(cli: &Cli, module: &ModuleArgs) -> anyhow::Result<VirtualMachine> {
    let file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut config = file.bridge;
    if let Some(dir) = &cli.cache_dir {
        config.cache.dir.clone_from(dir);
    }

    let options = match &cli.options {
        Some(json) => VmOptions::from_json(json).context("Invalid --options")?,
        None => file.options,
    };
    let options = VmOptions {
        enable_aot: options.enable_aot || cli.aot,
        enable_measurement: options.enable_measurement || cli.measure,
        ..options
    };

    let vm = if module.buffer {
        let bytes = std::fs::read(&module.module)
            .with_context(|| format!("Failed to read {}", module.module.display()))?;
        VirtualMachine::from_bytes(bytes, options, config)?
    } else {
        VirtualMachine::from_path(&module.module, options, config)?
    };
    Ok(vm)
}

fn print_stats(vm: &VirtualMachine) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(&vm.statistics())?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match &cli.command {
        Command::Start(module) => {
            let mut vm = load_vm(&cli, module)?;
            let code = vm.start()?;
            info!(exit_code = code, "Guest exited");
            if module.stats {
                print_stats(&vm)?;
            }
            std::process::exit(code);
        }
        Command::Run {
            module,
            function,
            args,
            returns,
        } => {
            let mut vm = load_vm(&cli, module)?;
            let args: Vec<_> = args.iter().map(|a| parse_cli_value(a)).collect();

            match returns {
                Returns::Void => vm.run(function, &args)?,
                Returns::I32 => println!("{}", vm.run_int(function, &args)?),
                Returns::U32 => println!("{}", vm.run_uint(function, &args)?),
                Returns::I64 => println!("{}", vm.run_int64(function, &args)?),
                Returns::U64 => println!("{}", vm.run_uint64(function, &args)?),
                Returns::String => println!("{}", vm.run_string(function, &args)?),
                Returns::Bytes => println!("{:?}", vm.run_bytes(function, &args)?),
            }

            if let Some(e) = vm.take_release_error() {
                warn!(error = %e, "Guest result buffer was not released");
            }
            if module.stats {
                print_stats(&vm)?;
            }
        }
        Command::Compile { module, output } => {
            let vm = load_vm(&cli, module)?;
            vm.compile(output)
                .with_context(|| format!("Failed to compile to {}", output.display()))?;
            info!(output = %output.display(), "Artifact written");
        }
    }

    Ok(())
}
