//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::bootstrap::{self, Continuation};
use crate::core::cancel::CancelToken;
use crate::core::client::HttpEngineClient;
use crate::core::config::Config;
use crate::error::Result;

/// Turnkey - secret-store bootstrap sidecar.
#[derive(Parser)]
#[command(
    name = "turnkey",
    about = "Initializes, unseals and provisions a Vault-compatible secret store",
    version
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "turnkey.toml", env = "TURNKEY_CONFIG")]
    pub config: PathBuf,

    /// Seconds between engine probes while initializing and unsealing
    #[arg(long, default_value_t = 10, env = "TURNKEY_INTERVAL")]
    pub interval: u64,

    /// Skip TLS certificate verification even when a CA bundle is configured
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Load configuration, build the engine client and run the bootstrap.
///
/// The cancellation token is accepted here so an embedding process (or a
/// future signal handler) can interrupt the otherwise unbounded polling
/// loops.
pub fn execute(cli: &Cli, cancel: &CancelToken) -> Result<Continuation> {
    let config = Config::load(&cli.config)?;
    let client = HttpEngineClient::new(&config.store, cli.insecure_skip_verify)?;
    bootstrap::run(&config, &client, cancel, Duration::from_secs(cli.interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["turnkey"]);
        assert_eq!(cli.config, PathBuf::from("turnkey.toml"));
        assert_eq!(cli.interval, 10);
        assert!(!cli.insecure_skip_verify);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "turnkey",
            "--config",
            "/etc/turnkey/turnkey.toml",
            "--interval",
            "3",
            "--insecure-skip-verify",
            "--verbose",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/turnkey/turnkey.toml"));
        assert_eq!(cli.interval, 3);
        assert!(cli.insecure_skip_verify);
        assert!(cli.verbose);
    }
}
