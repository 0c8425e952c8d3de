// Centralized observability infrastructure
// Structured logging setup shared by the CLI, the daemon, and tests.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging infrastructure with default verbosity.
/// This should be called once at application startup.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
///
/// Logs always go to stderr: stdout carries the tool protocol when the
/// daemon is driven by an agent, and human CLI output otherwise.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("aide=debug,info")
    } else {
        // Default: warnings and errors for aide, errors only for dependencies.
        EnvFilter::new("aide=warn,error")
    };

    // Quiet takes precedence over RUST_LOG so that --quiet always silences.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_writer(std::io::stderr)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if verbose {
                info!("aide observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments.
        Err(_) => Ok(()),
    }
}
