//! Named password-generation strategy.
//!
//! Credential passwords come from an external program so deployments can
//! swap generation policy without rebuilding: the configured executable is
//! run with its configured arguments and its stdout, trimmed, is the secret.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::config::PasswordConfig;
use crate::error::{ProvisionError, Result};

pub struct PasswordProvider<'a> {
    config: &'a PasswordConfig,
}

impl<'a> PasswordProvider<'a> {
    pub fn new(config: &'a PasswordConfig) -> Self {
        Self { config }
    }

    /// Run the strategy and capture one password.
    ///
    /// Failure is fatal for the caller: a credential that cannot be
    /// generated cannot be provisioned.
    pub fn generate(&self) -> Result<Zeroizing<String>> {
        let program = resolve_program(&self.config.program)?;
        debug!(program = %program.display(), "running password provider");

        let output = Command::new(&program)
            .args(&self.config.args)
            .output()
            .map_err(|e| ProvisionError::PasswordGeneration {
                program: program.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProvisionError::PasswordGeneration {
                program: program.display().to_string(),
                reason: format!("exited with {}", output.status),
            }
            .into());
        }

        let stdout = Zeroizing::new(String::from_utf8(output.stdout).map_err(|_| {
            ProvisionError::PasswordGeneration {
                program: program.display().to_string(),
                reason: "output is not valid UTF-8".to_string(),
            }
        })?);

        let password = stdout.trim();
        if password.is_empty() {
            return Err(ProvisionError::PasswordGeneration {
                program: program.display().to_string(),
                reason: "produced an empty password".to_string(),
            }
            .into());
        }

        Ok(Zeroizing::new(password.to_string()))
    }
}

/// Resolve a provider executable: absolute paths are taken as-is, anything
/// else is looked up on `PATH`.
pub(crate) fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.is_absolute() {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|source| {
        ProvisionError::ProviderNotFound {
            program: program.display().to_string(),
            source,
        }
        .into()
    })
}
