//! Turnkey - a bootstrap sidecar for Vault-compatible secret stores.

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use turnkey::cli::{execute, Cli};
use turnkey::core::bootstrap::Continuation;
use turnkey::core::cancel::CancelToken;
use turnkey::error::Kind;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env("TURNKEY_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("turnkey=debug")
        } else {
            EnvFilter::new("turnkey=info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let cancel = CancelToken::new();
    match execute(&cli, &cancel) {
        // Bootstrap is a terminal stage: a successful run still means there
        // is nothing further for this process to do.
        Ok(Continuation::Halt) => {
            info!("bootstrap finished");
        }
        Err(err) => match err.kind() {
            Kind::Terminal => {
                warn!(error = %err, "bootstrap stopped without completing");
            }
            _ => {
                error!(error = %err, "bootstrap failed");
                std::process::exit(1);
            }
        },
    }
}
