//! The bootstrap run: drive the engine to readiness, then provision it.
//!
//! Sequence: state controller (initialize/unseal) → health gate → transient
//! root token → stale-token cleanup → optional token-issuing token and
//! provider launch → KV engine enablement → credentials → certificate.
//!
//! Sensitive material is scoped: the IKM is wiped and the transient root
//! token revoked on every exit path out of this function, via guards rather
//! than trailing cleanup calls.

use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::cancel::CancelToken;
use crate::core::certs::CertificateProvisioner;
use crate::core::client::EngineApi;
use crate::core::config::{CertificateConfig, Config, ProviderKind};
use crate::core::constants;
use crate::core::credentials::CredentialProvisioner;
use crate::core::health::HealthGate;
use crate::core::kdf::KeyDeriver;
use crate::core::master_key::MasterKeyEncryption;
use crate::core::material::{InitMaterial, MaterialStore};
use crate::core::password::PasswordProvider;
use crate::core::state::StateController;
use crate::core::token_provider::TokenProvider;
use crate::core::tokens::{self, TokenManager};
use crate::error::{ProvisionError, Result};

/// What the caller should do after a bootstrap run.
///
/// The run reports `Halt` even on success: bootstrap is a terminal stage
/// and nothing in this process follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Halt,
}

/// Run the full bootstrap against the given engine.
pub fn run<A: EngineApi>(
    config: &Config,
    api: &A,
    cancel: &CancelToken,
    interval: Duration,
) -> Result<Continuation> {
    // Master-key encryption is enabled by the presence of an IKM handle.
    // The instance is dropped at the end of this function, which wipes the
    // IKM no matter how we leave.
    let deriver = KeyDeriver::new(&config.persistence.folder);
    let mut encryption = MasterKeyEncryption::new(deriver);
    match std::env::var(constants::IKM_HOOK_ENV) {
        Ok(hook) if !hook.is_empty() => {
            encryption.load_ikm(Path::new(&hook))?;
        }
        _ => {
            info!(
                "master key encryption not enabled; {} not set",
                constants::IKM_HOOK_ENV
            );
        }
    }

    let store = MaterialStore::new(&config.persistence);
    let controller = StateController::new(
        api,
        &encryption,
        &store,
        &config.store,
        interval,
        cancel.clone(),
    );
    let material = controller.run_until_ready()?;

    // The engine answers errors for a warm-up period after unsealing.
    HealthGate::new(constants::HEALTH_POLL_INTERVAL).wait_until_ready(api, cancel)?;

    let manager = TokenManager::new(api);
    let root = manager.regenerate_root(&material)?;

    if config.store.revoke_root_tokens {
        strip_persisted_root_token(&store, &encryption, &material)?;
        let revoked = manager.revoke_root_tokens(root.token());
        info!(revoked, "completed cleanup of old root tokens");
    } else {
        info!("not revoking existing root tokens");
    }

    let revoked = manager.revoke_non_root_tokens(root.token());
    info!(revoked, "completed cleanup of old service tokens");

    // Created after the root guard so it is revoked first on unwind.
    let mut issuing_guard = None;
    if let Some(provider) = &config.token_provider {
        if let Some(admin_token_path) = &provider.admin_token_path {
            let (issued, guard) = manager.create_token_issuing_token(root.token())?;
            tokens::write_admin_token_file(admin_token_path, &issued)?;
            match provider.kind {
                ProviderKind::Oneshot => issuing_guard = Some(guard),
                ProviderKind::LongRunning => guard.release(),
            }
        }

        TokenProvider::new(provider).launch()?;
    } else {
        info!("no token provider configured");
    }

    enable_kv_engine(api, root.token())?;

    let generator = PasswordProvider::new(&config.password);
    let credentials = CredentialProvisioner::new(api, root.token(), &generator);
    credentials.provision(&config.databases)?;

    if let Some(certificate) = &config.certificate {
        provision_certificate(api, root.token(), certificate)?;
    } else {
        info!("certificate upload skipped; no certificate configured");
    }

    info!("secret store bootstrap complete");
    drop(issuing_guard);
    Ok(Continuation::Halt)
}

/// Re-persist the material without its root token once a transient root
/// exists. The re-saved copy goes through the same encryption as the
/// original persist, so the file never regresses to plaintext.
fn strip_persisted_root_token(
    store: &MaterialStore,
    encryption: &MasterKeyEncryption,
    material: &InitMaterial,
) -> Result<()> {
    if material.root_token.is_none() {
        return Ok(());
    }

    let mut persisted = material.clone();
    persisted.strip_root_token();
    if encryption.is_encrypting() {
        encryption.encrypt_material(&mut persisted)?;
    }
    store.save(&persisted)?;
    info!("root token stripped from persisted init material");
    Ok(())
}

fn enable_kv_engine<A: EngineApi>(api: &A, root: &str) -> Result<()> {
    let installed = api
        .secrets_engine_installed(root, constants::KV_MOUNT_KEY, constants::KV_ENGINE_TYPE)
        .map_err(ProvisionError::KvEngine)?;

    if installed {
        info!("KV secrets engine already enabled");
        return Ok(());
    }

    info!("enabling KV secrets engine");
    api.enable_kv_engine(root, constants::KV_MOUNT)
        .map_err(ProvisionError::KvEngine)?;
    Ok(())
}

fn provision_certificate<A: EngineApi>(
    api: &A,
    root: &str,
    config: &CertificateConfig,
) -> Result<()> {
    let provisioner = CertificateProvisioner::new(api, root, &config.store_path);
    provisioner.provision(&config.cert_file, &config.key_file)
}
