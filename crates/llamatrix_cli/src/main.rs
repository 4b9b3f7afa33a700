//! llamatrix - Matrix to Ollama bridge bot.
//!
//! Exit codes:
//! - 0: Clean shutdown
//! - 1: General error
//! - 2: Invalid configuration
//! - 3: Matrix login or sync failure

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use llamatrix_core::ConfigError;
use llamatrix_matrix::MatrixError;

mod args;
mod bridge;

use args::Cli;

/// Process exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const MATRIX_ERROR: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let result = match cli.to_config() {
        Ok(config) => bridge::run(config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "llamatrix=debug,warn"
    } else {
        "llamatrix=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let log_result = tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Map an error to the exit code of its root cause
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.chain().any(|cause| cause.is::<ConfigError>()) {
        ExitCodes::CONFIG_ERROR
    } else if e.chain().any(|cause| cause.is::<MatrixError>()) {
        ExitCodes::MATRIX_ERROR
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_error() {
        let config: anyhow::Error = ConfigError::Missing("model").into();
        assert_eq!(categorize_error(&config), ExitCodes::CONFIG_ERROR);

        let login = Err::<(), _>(MatrixError::NotLoggedIn)
            .context("Failed to log in to Matrix")
            .unwrap_err();
        assert_eq!(categorize_error(&login), ExitCodes::MATRIX_ERROR);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("boom")),
            ExitCodes::GENERAL_ERROR
        );
    }
}
