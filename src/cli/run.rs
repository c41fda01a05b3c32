//! Core run command
//!
//! Starts the VPN core under the supervisor and acts as its observer: log
//! lines are printed as they arrive and lifecycle events decide when to exit.

use clap::Args;
use colored::Colorize;
use hwl_core::config::toml_config::load_config;
use hwl_core::error::{ConfigError, HwlError};
use hwl_core::supervisor::{LogLine, Supervisor, SupervisorEvent};
use std::path::PathBuf;
use tracing::{info, warn};

/// Options of `hwl run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// File whose contents are handed to the core on stdin
    #[arg(long)]
    pub payload: PathBuf,

    /// Keep the core attached to this terminal's session
    #[arg(long)]
    pub show_console: bool,

    /// Core executable, overriding the configured one
    #[arg(long)]
    pub core: Option<PathBuf>,

    /// Core argument, overriding the configured list (repeatable)
    #[arg(long = "core-arg", allow_hyphen_values = true)]
    pub core_args: Vec<String>,

    /// Directory the core is resolved against
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}

/// Run the core until Ctrl-C or until it terminates on its own
///
/// Returns the process exit code: 0 after a requested stop, 1 when the core
/// died by itself.
pub async fn run_core(args: RunArgs) -> Result<i32, HwlError> {
    let mut config = load_config()?;
    if let Some(core) = args.core {
        config.core_executable = core;
    }
    if !args.core_args.is_empty() {
        config.core_args = args.core_args;
    }
    if let Some(dir) = args.install_dir {
        config.install_dir = Some(std::fs::canonicalize(&dir).map_err(|e| {
            HwlError::Config(ConfigError::IoError {
                message: format!("Invalid install directory {}: {}", dir.display(), e),
            })
        })?);
    }

    let payload = std::fs::read_to_string(&args.payload).map_err(|e| {
        HwlError::Config(ConfigError::IoError {
            message: format!("Failed to read payload {}: {}", args.payload.display(), e),
        })
    })?;

    let (mut supervisor, mut events) = Supervisor::new(config)?;
    let mut logs = supervisor.subscribe_logs();
    let printer = tokio::spawn(async move {
        while let Some(line) = logs.recv().await {
            print_line(&line);
        }
    });

    if let Err(e) = supervisor.start(&payload, !args.show_console).await {
        // Let the failure status reach the terminal before exiting
        supervisor.shutdown().await;
        join_printer(printer).await;
        return Err(e.into());
    }

    let exit_code = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted, stopping core");
                supervisor.stop().await;
                break 0;
            }
            event = events.recv() => match event {
                Some(SupervisorEvent::ProcessStarted { pid }) => {
                    println!("{}", format!("core started (pid {})", pid).green());
                }
                Some(SupervisorEvent::Terminated { pid, exit }) => {
                    println!("{}", format!("core {} terminated: {}", pid, exit).red());
                    break 1;
                }
                Some(SupervisorEvent::Stopped { .. }) => {}
                None => break 1,
            },
        }
    };

    supervisor.shutdown().await;
    join_printer(printer).await;

    Ok(exit_code)
}

/// Wait for every buffered line to be printed
///
/// The log stream closes once the supervisor and its tasks are gone.
async fn join_printer(printer: tokio::task::JoinHandle<()>) {
    if let Err(e) = printer.await {
        warn!("Log printer failed: {}", e);
    }
}

fn print_line(line: &LogLine) {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    match line {
        // Nothing shown yet in a fresh terminal, so there is nothing to clear
        LogLine::Reset => {}
        LogLine::Core(_) => println!("{} {}", stamp.to_string().dimmed(), line),
        LogLine::Status(_) => println!("{} {}", stamp.to_string().dimmed(), line.render().bold()),
    }
}
