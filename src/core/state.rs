//! Engine state classification and the initialize/unseal control loop.
//!
//! The engine's health endpoint answers with a status code per state; the
//! controller classifies each probe into an [`EngineState`] and drives the
//! engine toward `Unsealed`, retrying transient conditions on a fixed
//! interval without bound. The loop is written against the injected
//! [`EngineApi`] collaborator so it can be exercised without a live engine.

use std::time::Duration;
use tracing::{info, warn};

use crate::core::cancel::CancelToken;
use crate::core::client::EngineApi;
use crate::core::config::StoreConfig;
use crate::core::master_key::MasterKeyEncryption;
use crate::core::material::{InitMaterial, MaterialStore};
use crate::error::{ApiError, Error, Result};

/// Observable engine states, derived from a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Sealed,
    Unsealed,
    Standby,
    Unreachable,
}

impl EngineState {
    /// Classify a health-probe status code. Total: every probe outcome maps
    /// to exactly one state, and anything unrecognized is `Unreachable`.
    pub fn classify(status: Option<u16>) -> Self {
        match status {
            Some(200) => EngineState::Unsealed,
            Some(429) => EngineState::Standby,
            Some(501) => EngineState::Uninitialized,
            Some(503) => EngineState::Sealed,
            _ => EngineState::Unreachable,
        }
    }
}

/// Drives the engine to readiness and owns the persisted init material.
pub struct StateController<'a, A: EngineApi> {
    api: &'a A,
    encryption: &'a MasterKeyEncryption,
    store: &'a MaterialStore,
    settings: &'a StoreConfig,
    interval: Duration,
    cancel: CancelToken,
}

impl<'a, A: EngineApi> StateController<'a, A> {
    pub fn new(
        api: &'a A,
        encryption: &'a MasterKeyEncryption,
        store: &'a MaterialStore,
        settings: &'a StoreConfig,
        interval: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            api,
            encryption,
            store,
            settings,
            interval,
            cancel,
        }
    }

    /// Probe, classify and act until the engine is unsealed.
    ///
    /// Returns the plaintext init material for the rest of the bootstrap.
    /// `Standby` and cancellation end the loop with a terminal error; file
    /// and crypto failures are fatal; everything else retries.
    pub fn run_until_ready(&self) -> Result<InitMaterial> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let status = self.api.health();
            let state = EngineState::classify(status);

            let outcome = match state {
                EngineState::Unsealed => {
                    info!(status = status.unwrap_or(0), "engine is initialized and unsealed");
                    let mut material = self.store.load()?;
                    if self.encryption.is_encrypting() {
                        self.encryption.decrypt_material(&mut material)?;
                    }
                    return Ok(material);
                }
                EngineState::Standby => {
                    warn!(
                        status = status.unwrap_or(0),
                        "engine is unsealed on another node; standing down"
                    );
                    return Err(ApiError::Standby.into());
                }
                EngineState::Uninitialized => {
                    info!("engine is uninitialized; starting initialize and unseal");
                    self.initialize_and_unseal()?
                }
                EngineState::Sealed => {
                    info!("engine is sealed; starting unseal");
                    self.unseal_from_disk()?
                }
                EngineState::Unreachable => {
                    warn!(status = ?status, "engine is unreachable");
                    None
                }
            };

            if let Some(material) = outcome {
                return Ok(material);
            }

            info!(
                seconds = self.interval.as_secs(),
                "retrying engine initialize/unseal"
            );
            if self.cancel.sleep(self.interval) {
                return Err(Error::Cancelled);
            }
        }
    }

    /// First-time initialization. The material is persisted (stripped of
    /// the root token when retention is disabled, encrypted when an IKM is
    /// loaded) before the unseal is attempted, so a crash between the two
    /// still leaves a usable file behind.
    ///
    /// `Ok(None)` means retry; persistence and encryption failures are fatal.
    fn initialize_and_unseal(&self) -> Result<Option<InitMaterial>> {
        let material = match self
            .api
            .initialize(self.settings.secret_threshold, self.settings.secret_shares)
        {
            Ok(material) => material,
            Err(err) => {
                warn!(error = %err, "initialize failed");
                return Ok(None);
            }
        };

        let mut persisted = material.clone();
        if self.settings.revoke_root_tokens {
            persisted.strip_root_token();
            info!("root token stripped from persisted init material");
        }
        if self.encryption.is_encrypting() {
            self.encryption.encrypt_material(&mut persisted)?;
        }
        self.store.save(&persisted)?;

        match self.api.unseal(&material) {
            Ok(()) => Ok(Some(material)),
            Err(err) => {
                warn!(error = %err, "unseal failed");
                Ok(None)
            }
        }
    }

    /// Unseal from the persisted material. A missing or corrupt file is
    /// fatal: the shares cannot be recovered.
    fn unseal_from_disk(&self) -> Result<Option<InitMaterial>> {
        let mut material = self.store.load()?;
        if self.encryption.is_encrypting() {
            self.encryption.decrypt_material(&mut material)?;
        }

        match self.api.unseal(&material) {
            Ok(()) => Ok(Some(material)),
            Err(err) => {
                warn!(error = %err, "unseal failed");
                Ok(None)
            }
        }
    }
}
