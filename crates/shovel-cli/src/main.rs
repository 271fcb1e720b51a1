//! Command-line entry point for the Shovel runtime: `develop` serves a
//! config against a live worker pool, `build` proves the config and
//! entry module resolve and boot cleanly.

use clap::{Parser, Subcommand};
use shovel_common::{init_logging, LogConfig};
use tracing::error;

mod app;
mod entry;
mod listener;
mod native_fetch;

#[derive(Parser, Debug)]
#[command(name = "shovel")]
#[command(about = "Run server-side ServiceWorker scripts as a long-running HTTP server")]
struct Args {
    /// Enable verbose (debug-level) logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve `entry` against `config` until interrupted.
    Develop {
        /// Path to the TOML config file.
        #[arg(long, default_value = "shovel.toml")]
        config: String,
        /// Registered entry module name to run.
        entry: String,
    },
    /// Resolve `entry` against `config` and confirm it installs and
    /// activates cleanly, without serving traffic.
    Build {
        #[arg(long, default_value = "shovel.toml")]
        config: String,
        entry: String,
    },
}

fn main() {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match args.command {
            Command::Develop { config, entry } => app::develop(&config, &entry).await,
            Command::Build { config, entry } => app::build(&config, &entry).await,
        }
    });

    if let Err(e) = result {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
