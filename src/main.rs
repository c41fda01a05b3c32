//! hwl - VPN core supervisor CLI
//!
//! Runs the VPN core with a configuration payload on its stdin and streams
//! its output to the terminal until interrupted or until the core exits.

use clap::{Parser, Subcommand};
use hwl_core::{error::HwlError, init_logging};

mod cli;

#[derive(Parser)]
#[command(name = "hwl")]
#[command(about = "Supervise the VPN core and stream its logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the VPN core and stream its output until Ctrl-C
    Run(cli::run::RunArgs),
    /// Show the effective supervisor settings
    Config {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,

        /// Write the effective settings to the config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cli::run::run_core(args).await,
        Commands::Config { json, init } => cli::config::show_config(json, init),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let exit_code = match e {
                // Configuration errors (exit code 2)
                HwlError::Config(_) | HwlError::Toml(_) | HwlError::TomlSerialize(_) => 2,
                // Launch failures (exit code 1 - runtime)
                HwlError::Supervisor(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
