use std::{
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
};

use clap::Parser;
use tether::{LogMask, ProcessLauncher, TargetOptions, logging, run_target};
use tracing::error;

/// Serves a virtual disk to launched programs and runs executables on
/// behalf of a connected controller.
#[derive(Parser)]
#[command(name = "tether-target", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// TCP port to listen on.
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

    let opts = TargetOptions { address: args.address, port: args.port };
    match run_target(&opts, ProcessLauncher::new, &shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "console", "{e}");
            ExitCode::FAILURE
        }
    }
}
