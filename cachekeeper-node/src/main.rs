//! # Cachekeeper Node CLI
//!
//! Command-line runner for a cachekeeper cache system.

use clap::{Parser, Subcommand};
use tracing::{error, info};

use cachekeeper_core::telemetry::{init_tracing, TelemetryConfig};

mod commands;

/// CLI structure
#[derive(Parser, Debug)]
#[command(name = "cachekeeper")]
#[command(about = "Cachekeeper - in-process cache lifecycle management")]
#[command(version)]
struct Cli {
    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a cache system until interrupted
    Run(commands::run::RunArgs),

    /// Validate a config file without starting anything
    Validate(commands::config::ValidateArgs),

    /// Export instance configs in another format
    Export(commands::config::ExportArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::verbose()
    } else {
        TelemetryConfig::default()
    };
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("Warning: {}", e);
    }

    info!("Running command: {:?}", cli.command);

    let result = match cli.command {
        Commands::Run(args) => commands::run::handle_run(args, cli.json).await,
        Commands::Validate(args) => commands::config::handle_validate(args, cli.json).await,
        Commands::Export(args) => commands::config::handle_export(args).await,
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
