//! Master-key encryption of the persisted initialization material.
//!
//! The key shares in the init-material file are the crown jewels: anyone
//! holding threshold-many of them can unseal the engine and mint root
//! capability. When an IKM source is configured, the shares are wrapped with
//! AES-256-GCM under a key derived from that IKM, so the file alone is
//! useless.
//!
//! Invariants:
//! - the IKM buffer is wiped exactly once per run, on every exit path;
//! - `is_encrypting()` never changes after the IKM load has been attempted;
//! - the derived encryption context lives only for the span of a single
//!   encrypt or decrypt call.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::core::constants;
use crate::core::kdf::KeyDeriver;
use crate::core::material::InitMaterial;
use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

/// Wraps and unwraps init material with a key derived from external IKM.
///
/// Dropping the value wipes any retained IKM, so a fatal error anywhere in
/// the bootstrap still scrubs the key material from memory.
pub struct MasterKeyEncryption {
    deriver: KeyDeriver,
    ikm: Option<Zeroizing<Vec<u8>>>,
    enabled: bool,
    wiped: bool,
}

impl MasterKeyEncryption {
    /// A disabled instance. Call [`load_ikm`](Self::load_ikm) to enable.
    pub fn new(deriver: KeyDeriver) -> Self {
        Self {
            deriver,
            ikm: None,
            enabled: false,
            wiped: false,
        }
    }

    /// Read hex-encoded IKM from the named handle (a pipe or file) and
    /// enable encryption.
    ///
    /// # Errors
    ///
    /// A configured source that cannot be read or decoded is fatal; the
    /// caller must not fall back to plaintext persistence.
    pub fn load_ikm(&mut self, source: &Path) -> Result<(), CryptoError> {
        debug!(source = %source.display(), "reading IKM");

        let raw = fs::read_to_string(source).map_err(|e| CryptoError::IkmRead {
            path: source.display().to_string(),
            source: e,
        })?;
        let mut raw = Zeroizing::new(raw);

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::IkmEmpty(source.display().to_string()));
        }
        let ikm = Zeroizing::new(hex::decode(trimmed)?);
        raw.zeroize();

        if ikm.is_empty() {
            return Err(CryptoError::IkmEmpty(source.display().to_string()));
        }

        self.ikm = Some(ikm);
        self.enabled = true;
        info!("master key encryption enabled");
        Ok(())
    }

    /// Whether persisted material is encrypted. Fixed for the process
    /// lifetime once the IKM load has been attempted (or skipped).
    pub fn is_encrypting(&self) -> bool {
        self.enabled
    }

    /// Encrypt the key shares in place. The root token is never persisted
    /// when retention is disabled, so only the shares are transformed.
    pub fn encrypt_material(&self, material: &mut InitMaterial) -> Result<(), CryptoError> {
        let cipher = self.cipher()?;

        for share in &mut material.keys {
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(&nonce, share.as_bytes())
                .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

            let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            sealed.extend_from_slice(&nonce);
            sealed.extend_from_slice(&ciphertext);
            *share = BASE64.encode(sealed);
        }

        Ok(())
    }

    /// Decrypt the key shares in place. Exact inverse of
    /// [`encrypt_material`](Self::encrypt_material).
    pub fn decrypt_material(&self, material: &mut InitMaterial) -> Result<(), CryptoError> {
        let cipher = self.cipher()?;

        for share in &mut material.keys {
            let sealed = BASE64.decode(share.as_bytes())?;
            if sealed.len() <= NONCE_LEN {
                return Err(CryptoError::Decrypt("ciphertext too short".to_string()));
            }
            let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
            let plaintext = cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

            *share = String::from_utf8(plaintext)
                .map_err(|e| CryptoError::Decrypt(format!("UTF-8 error: {}", e)))?;
        }

        Ok(())
    }

    /// Overwrite the IKM buffer with zeroes. Idempotent; the buffer is
    /// zeroed at most once, and later encrypt/decrypt calls fail.
    pub fn wipe_ikm(&mut self) {
        if let Some(mut ikm) = self.ikm.take() {
            ikm.zeroize();
            debug!("IKM wiped from memory");
        }
        self.wiped = true;
    }

    /// Derive the encryption context for one call. The key is zeroed when
    /// the returned cipher's key buffer drops at the end of that call.
    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        let ikm = match &self.ikm {
            Some(ikm) => ikm,
            None if self.wiped => return Err(CryptoError::IkmWiped),
            None => {
                return Err(CryptoError::Derive(
                    "encryption requested but no IKM loaded".to_string(),
                ))
            }
        };

        let key = self.deriver.derive(ikm, constants::KDF_CONTEXT)?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key)))
    }
}

impl Drop for MasterKeyEncryption {
    fn drop(&mut self) {
        self.wipe_ikm();
    }
}
