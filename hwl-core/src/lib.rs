//! Core library for the hwl VPN supervisor
//!
//! This crate owns the lifecycle of the VPN core process: launching it with
//! its configuration on stdin, streaming its output, detecting crashes, and
//! making sure it never outlives the supervisor.

pub mod error;

pub mod config;
pub mod supervisor;

/// Environment variable selecting the log level (`trace` .. `error`)
pub const LOG_LEVEL_ENV: &str = "HWL_LOG";

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running as a service.
/// Otherwise logs to stderr with pretty formatting so stdout stays free for
/// the core's log stream.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    // Try to use systemd journal logging if available
    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(level)
                .init();
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(level)
        .init();

    Ok(())
}
