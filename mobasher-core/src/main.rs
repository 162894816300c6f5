//! Binary entry point: loads environment, starts logging, parses the
//! operator CLI, and dispatches. Sets up the global allocator, loads
//! `.env`, initializes logging, then hands off to the long-running body
//! for whichever subset of components a given subcommand starts.

use clap::Parser;
use mobasher_core::cli::{self, Cli, EXIT_REFUSED};
use mobasher_core::logging::init_logging;
use mobasher_core::Error;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("MOBASHER_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let log_json = std::env::var("MOBASHER_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let (logging_config, _guard) = match init_logging(&log_dir, log_json) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    logging_config.start_retention_cleanup(tokio_util::sync::CancellationToken::new());

    info!("mobasher {}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match cli::run(cli).await {
        Ok(0) => std::process::ExitCode::SUCCESS,
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(Error::RetentionSafety(msg)) => {
            error!(%msg, "refused");
            std::process::ExitCode::from(EXIT_REFUSED as u8)
        }
        Err(e) => {
            error!(error = %e, "command failed");
            std::process::ExitCode::FAILURE
        }
    }
}
