//! Key derivation for master-key encryption.
//!
//! Derives the AES-256 key from externally supplied IKM with HKDF-SHA256.
//! The extraction salt is random, generated on first use, and persisted
//! beside the init material so later runs derive the same key.

use hkdf::Hkdf;
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::constants;
use crate::error::CryptoError;

const SALT_LEN: usize = 32;

/// Derives symmetric keys from IKM, managing the persisted salt.
#[derive(Debug)]
pub struct KeyDeriver {
    salt_path: PathBuf,
}

impl KeyDeriver {
    /// A deriver whose salt lives in `folder`.
    pub fn new(folder: &Path) -> Self {
        Self {
            salt_path: folder.join(constants::KDF_SALT_FILE),
        }
    }

    /// Derive a 256-bit key for the given context.
    ///
    /// Deterministic for a fixed `(ikm, salt, info)` triple; the salt is
    /// created on the first call and reused afterwards.
    pub fn derive(
        &self,
        ikm: &[u8],
        info: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let salt = self.load_or_create_salt()?;

        let hk = Hkdf::<Sha256>::new(Some(&salt), ikm);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(info, &mut *okm)
            .map_err(|e| CryptoError::Derive(e.to_string()))?;

        Ok(okm)
    }

    fn load_or_create_salt(&self) -> Result<Vec<u8>, CryptoError> {
        if self.salt_path.exists() {
            let salt = fs::read(&self.salt_path).map_err(|e| CryptoError::Salt {
                path: self.salt_path.display().to_string(),
                reason: e.to_string(),
            })?;
            if salt.len() != SALT_LEN {
                return Err(CryptoError::Salt {
                    path: self.salt_path.display().to_string(),
                    reason: format!("expected {} bytes, found {}", SALT_LEN, salt.len()),
                });
            }
            return Ok(salt);
        }

        debug!(path = %self.salt_path.display(), "generating KDF salt");

        let salt = {
            use aes_gcm::aead::{KeyInit, OsRng};
            aes_gcm::Aes256Gcm::generate_key(&mut OsRng).to_vec()
        };

        if let Some(folder) = self.salt_path.parent() {
            fs::create_dir_all(folder).map_err(|e| CryptoError::Salt {
                path: self.salt_path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        write_salt(&self.salt_path, &salt).map_err(|e| CryptoError::Salt {
            path: self.salt_path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(salt)
    }
}

fn write_salt(path: &Path, salt: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(salt)?;
    file.sync_all()
}
