//! Initialization material: the key shares and root token produced when the
//! engine is first initialized.
//!
//! The material is persisted as a JSON document with owner-only permissions.
//! The key shares in the persisted copy may be ciphertext when master-key
//! encryption is enabled; the in-memory value handed around the bootstrap is
//! always plaintext. The file is single-writer by deployment contract (one
//! bootstrap instance per deployment); no file locking is done here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::core::config::PersistenceConfig;
use crate::error::{MaterialError, Result};

/// Output of engine initialization, kept for later unseals and root-token
/// regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMaterial {
    /// Absent when root-token retention is disabled by policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_token: Option<String>,
    /// Hex-encoded key shares, in engine order. Ciphertext at rest when
    /// encryption is enabled.
    pub keys: Vec<String>,
    pub threshold: u32,
    pub shares: u32,
}

impl InitMaterial {
    /// Clear the root token, typically before persisting.
    pub fn strip_root_token(&mut self) {
        self.root_token = None;
    }
}

/// Reads and writes the init-material file with restricted permissions.
#[derive(Debug, Clone)]
pub struct MaterialStore {
    path: PathBuf,
}

impl MaterialStore {
    pub fn new(persistence: &PersistenceConfig) -> Self {
        Self {
            path: persistence.folder.join(&persistence.file),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Persist the material as JSON, creating the folder if needed.
    ///
    /// The folder is created with mode 0700 and the file written with 0600;
    /// only the bootstrap's own user may touch either.
    pub fn save(&self, material: &InitMaterial) -> Result<()> {
        debug!(path = %self.path.display(), "persisting init material");

        if let Some(folder) = self.path.parent() {
            fs::create_dir_all(folder).map_err(|source| MaterialError::Write {
                path: folder.display().to_string(),
                source,
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(folder, fs::Permissions::from_mode(0o700));
            }
        }

        let contents =
            serde_json::to_vec_pretty(material).map_err(|source| MaterialError::Malformed {
                path: self.path.display().to_string(),
                source,
            })?;

        write_owner_only(&self.path, &contents).map_err(|source| MaterialError::Write {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }

    /// Load previously persisted material.
    ///
    /// # Errors
    ///
    /// Returns `MaterialError::Read` if the file is missing or unreadable
    /// (a sealed engine cannot be recovered without it) and
    /// `MaterialError::Malformed` if the JSON does not parse.
    pub fn load(&self) -> Result<InitMaterial> {
        debug!(path = %self.path.display(), "loading init material");

        #[cfg(unix)]
        self.check_permissions();

        let contents = fs::read(&self.path).map_err(|source| MaterialError::Read {
            path: self.path.display().to_string(),
            source,
        })?;

        let material =
            serde_json::from_slice(&contents).map_err(|source| MaterialError::Malformed {
                path: self.path.display().to_string(),
                source,
            })?;

        Ok(material)
    }

    #[cfg(unix)]
    fn check_permissions(&self) {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = fs::metadata(&self.path) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    path = %self.path.display(),
                    mode = format!("{:o}", mode),
                    "init material file is readable by other users"
                );
            }
        }
    }
}

/// Write a file readable and writable only by the owner.
fn write_owner_only(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // An existing file keeps its old mode; clamp it down either way.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}
