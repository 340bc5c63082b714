use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
};

use clap::Parser;
use tether::{ControllerOptions, LogMask, logging, run_controller};
use tracing::error;

/// Connects to a target, serves it files, and runs the named executable
/// there; exits with the executable's exit code.
#[derive(Parser)]
#[command(name = "tether-controller", version)]
struct Args {
    /// Target host to connect to.
    host: String,

    /// Path to the executable, relative to fsroot, with forward slashes.
    executable: String,

    /// Arguments passed to the executable.
    #[arg(trailing_var_arg = true)]
    arguments: Vec<String>,

    /// The file serving directory; the executable must live inside it.
    #[arg(long, default_value = ".")]
    fsroot: PathBuf,

    /// TCP port to connect to on the target.
    #[arg(long, default_value_t = 7001)]
    port: u16,

    /// Log channels to toggle: d, n, i, w, c, p; a for all, 0 for none.
    #[arg(long, default_value = "")]
    log: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(LogMask::default().toggle(&args.log));

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .expect("couldn't register the interrupt handler");

    let opts = ControllerOptions {
        host: args.host,
        port: args.port,
        fsroot: args.fsroot,
        executable: args.executable,
        arguments: args.arguments.join(" "),
    };
    match run_controller(&opts, &shutdown) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            error!(target: "console", "{e}");
            ExitCode::FAILURE
        }
    }
}
