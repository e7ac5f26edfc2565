//! DerkJS command-line entry point
//!
//! Usage: derkjs [-h | -v | [-d | -r] <script name>]
//!   -h  show help
//!   -v  show version & author
//!   -r  compile and run a script
//!   -d  compile, dump the bytecode disassembly, then run

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use derkjs::vm::{DispatchPolicy, VmConfig};
use derkjs::{Driver, DriverInfo, HeapConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Dispatch {
    /// Central loop-switch interpreter core.
    Loop,
    /// Tail-dispatch core (script tail calls reuse their frame).
    Tail,
}

#[derive(Debug, Parser)]
#[command(name = "derkjs", disable_version_flag = true)]
struct Args {
    /// Show name, version, and author.
    #[arg(short = 'v')]
    version: bool,

    /// Compile and run a script.
    #[arg(short = 'r', value_name = "SCRIPT")]
    run: Option<PathBuf>,

    /// Compile, dump disassembly to stdout, then run.
    #[arg(short = 'd', value_name = "SCRIPT")]
    dump: Option<PathBuf>,

    /// Polyfill script executed before user code.
    #[arg(long, value_name = "SCRIPT")]
    polyfill: Option<PathBuf>,

    /// Interpreter core.
    #[arg(long, value_enum, default_value_t = Dispatch::Tail)]
    dispatch: Dispatch,

    /// GC threshold in bytes.
    #[arg(long, value_name = "BYTES")]
    gc_threshold: Option<usize>,
}

const USAGE: &str = "usage: ./derkjs [-h | -v | [-d | -r] <script name>]";

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.kind() == ErrorKind::DisplayHelp => {
            print!("{e}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if args.version {
        let info = DriverInfo::default();
        println!(
            "{} v{}.{}.{}\nBy: {}",
            info.name, info.version_major, info.version_minor, info.version_patch, info.author
        );
        return ExitCode::SUCCESS;
    }

    let (script, dump) = match (&args.run, &args.dump) {
        (Some(path), None) => (path.clone(), false),
        (None, Some(path)) => (path.clone(), true),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(script, dump, args) {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(script: PathBuf, dump: bool, args: Args) -> Result<u8> {
    let heap = HeapConfig {
        gc_threshold: args.gc_threshold.unwrap_or(HeapConfig::default().gc_threshold),
        ..HeapConfig::default()
    };
    let mut driver = Driver::with_config(DriverInfo::default(), heap, VmConfig::default())
        .context("engine startup failed")?;
    driver.enable_bc_dump(dump);
    driver.set_dispatch(match args.dispatch {
        Dispatch::Loop => DispatchPolicy::LoopSwitch,
        Dispatch::Tail => DispatchPolicy::Tail,
    });

    Ok(driver.run(&script, args.polyfill.as_deref()) as u8)
}
