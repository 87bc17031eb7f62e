// PSET v0.3.0 -- CONCURRENT MICRO-BENCHMARK RUNNER
// PINS EVERY PROGRAM THREAD TO ITS OWN CPU, OPTIONALLY SPLITS THE L3
// BETWEEN THEM, RUNS THEM TOGETHER AND REPORTS PER-PROGRAM METRICS
//
// THE HEAVY LIFTING IS IN THE LIBRARY. THIS BINARY HANDLES:
// COMMAND LINE, LOGGING, SIGINT, REPORTING

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "pset")]
#[command(about = "PSET -- RUN PINNED PROGRAMS TOGETHER, COLLECT THEIR COUNTERS")]
struct Cli {
    // DEBUG-LEVEL LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an experiment file and print per-program stats
    Run {
        file: PathBuf,

        // PREFIX FOR EVERY ARTIFACT OF THIS RUN
        #[arg(long, default_value = "run")]
        stamp: String,

        // PRINT STATS AS JSON INSTEAD OF A TABLE
        #[arg(long)]
        json: bool,
    },
    /// Print the script an experiment file would run, without running it
    Script {
        file: PathBuf,

        #[arg(long, default_value = "run")]
        stamp: String,
    },
    /// Print cache associativity, classes of service and online CPUs
    Probe,
    /// Check that the external tools and kernel support are present
    Check,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run { file, stamp, json } => {
            ctrlc::set_handler(move || {
                SHUTDOWN.store(true, Ordering::Relaxed);
            })?;
            cli::run::run_experiment(&file, &stamp, json, &SHUTDOWN)
        }
        Command::Script { file, stamp } => cli::run::print_script(&file, &stamp),
        Command::Probe => cli::probe::run_probe(),
        Command::Check => cli::check::run_check(),
    }
}
