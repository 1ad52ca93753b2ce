//! Launch of the delegated token-provider process.
//!
//! The provider hands out service tokens after bootstrap; its internals are
//! its own business. One-shot providers run to completion inside the
//! bootstrap and must exit cleanly; long-running providers are detached and
//! left to manage their own lifetime (and their issuing token's freshness).

use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::core::config::{ProviderKind, TokenProviderConfig};
use crate::core::password::resolve_program;
use crate::error::{ProvisionError, Result};

pub struct TokenProvider<'a> {
    config: &'a TokenProviderConfig,
}

impl<'a> TokenProvider<'a> {
    pub fn new(config: &'a TokenProviderConfig) -> Self {
        Self { config }
    }

    /// Start the provider. One-shot providers are waited on and a non-zero
    /// exit is fatal; long-running providers are spawned and detached.
    pub fn launch(&self) -> Result<()> {
        let program = resolve_program(&self.config.program)?;
        debug!(program = %program.display(), kind = ?self.config.kind, "launching token provider");

        let mut command = Command::new(&program);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        match self.config.kind {
            ProviderKind::Oneshot => {
                let status =
                    command
                        .status()
                        .map_err(|e| ProvisionError::TokenProvider {
                            program: program.display().to_string(),
                            reason: e.to_string(),
                        })?;
                if !status.success() {
                    return Err(ProvisionError::TokenProvider {
                        program: program.display().to_string(),
                        reason: format!("exited with {}", status),
                    }
                    .into());
                }
                info!("token provider completed");
            }
            ProviderKind::LongRunning => {
                let child = command.spawn().map_err(|e| ProvisionError::TokenProvider {
                    program: program.display().to_string(),
                    reason: e.to_string(),
                })?;
                info!(pid = child.id(), "token provider running");
            }
        }

        Ok(())
    }
}
