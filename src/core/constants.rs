//! Constants used throughout turnkey.
//!
//! Centralizes magic strings and protocol values.

use std::time::Duration;

/// Environment variable naming the IKM source handle (a pipe or file path).
///
/// When unset or empty, at-rest encryption of the init material is disabled.
pub const IKM_HOOK_ENV: &str = "IKM_HOOK";

/// KV v1 mount point for provisioned secrets.
pub const KV_MOUNT: &str = "secret";

/// Mount key as it appears in the engine's mounts listing.
pub const KV_MOUNT_KEY: &str = "secret/";

/// Engine type for the key-value secrets backend.
pub const KV_ENGINE_TYPE: &str = "kv";

/// Root namespace for provisioned credential and certificate paths.
pub const SECRET_BASE_PATH: &str = "edgex";

/// Salt file for the master-key KDF, stored beside the init material.
pub const KDF_SALT_FILE: &str = "kdf-salt.dat";

/// Default file name for the persisted initialization material.
pub const MATERIAL_FILE: &str = "init-material.json";

/// HKDF info string binding derived keys to this use.
pub const KDF_CONTEXT: &[u8] = b"turnkey-init-material";

/// Name of the ACL policy installed for the token-issuing token.
pub const TOKEN_CREATOR_POLICY_NAME: &str = "token-creator";

/// ACL policy granting only the ability to mint further tokens.
pub const TOKEN_CREATOR_POLICY: &str = r#"path "auth/token/create" {
  capabilities = ["create", "update", "sudo"]
}

path "auth/token/create-orphan" {
  capabilities = ["create", "update", "sudo"]
}

path "auth/token/create/*" {
  capabilities = ["create", "update", "sudo"]
}
"#;

/// Interval for the post-unseal readiness poll.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request timeout for administrative API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
