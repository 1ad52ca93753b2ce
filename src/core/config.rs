//! Configuration file management.
//!
//! Handles reading and validating the `turnkey.toml` configuration file that
//! describes the engine endpoint, persistence paths, provisioning targets and
//! the external provider programs.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::constants;
use crate::error::{ConfigError, Result};

/// Top-level configuration loaded from `turnkey.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine endpoint and secret-sharing parameters.
    pub store: StoreConfig,
    /// Where the initialization material lives on disk.
    pub persistence: PersistenceConfig,
    /// Password-generation strategy for database credentials.
    pub password: PasswordConfig,
    /// Optional delegated token-provider process.
    #[serde(default)]
    pub token_provider: Option<TokenProviderConfig>,
    /// `(service, database)` pairs to provision credentials for.
    #[serde(default)]
    pub databases: Vec<DatabaseInfo>,
    /// Optional proxy certificate pair to upload.
    #[serde(default)]
    pub certificate: Option<CertificateConfig>,
}

/// Connection and secret-sharing settings for the secret-store engine.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// CA bundle used to verify the engine's TLS certificate. When absent,
    /// certificate verification is bypassed.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Expected TLS server name, when it differs from `host`.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Key shares required to unseal.
    #[serde(default = "default_threshold")]
    pub secret_threshold: u32,
    /// Total key shares generated at initialization.
    #[serde(default = "default_shares")]
    pub secret_shares: u32,
    /// When true, the root token is never persisted and tokens with the root
    /// policy from earlier runs are revoked.
    #[serde(default = "default_true")]
    pub revoke_root_tokens: bool,
}

/// Location of the persisted initialization material.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    pub folder: PathBuf,
    #[serde(default = "default_material_file")]
    pub file: String,
}

/// Named password-generation strategy.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordConfig {
    /// Executable implementing the strategy. Resolved via `PATH` when not
    /// absolute.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Delegated token-provider process settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenProviderConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Where the token-issuing token is written for the provider to pick up.
    /// When absent, no issuing token is created.
    #[serde(default)]
    pub admin_token_path: Option<PathBuf>,
}

/// Lifecycle of the token-provider process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Runs to completion during bootstrap; its issuing token is revoked at
    /// end of run.
    #[default]
    Oneshot,
    /// Outlives the bootstrap and keeps its own token fresh.
    LongRunning,
}

/// One `(service, database)` provisioning target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseInfo {
    pub service: String,
    pub name: String,
}

/// Proxy certificate pair settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateConfig {
    /// KV path the pair is uploaded to, relative to the KV mount.
    pub store_path: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_threshold() -> u32 {
    3
}

fn default_shares() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_material_file() -> String {
    constants::MATERIAL_FILE.to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile` if the file cannot be read,
    /// `ConfigError::Parse` if the TOML is malformed, or a validation error.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;

        config.validate()?;

        debug!(
            host = %config.store.host,
            databases = config.databases.len(),
            "config loaded"
        );

        Ok(config)
    }

    /// Validate the configuration structure and contents.
    pub fn validate(&self) -> Result<()> {
        match self.store.protocol.as_str() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "store.protocol",
                    reason: format!("expected http or https, got {}", other),
                }
                .into());
            }
        }

        if self.store.host.is_empty() {
            return Err(ConfigError::MissingField {
                field: "store.host",
            }
            .into());
        }

        if self.store.secret_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.secret_threshold",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.store.secret_threshold > self.store.secret_shares {
            return Err(ConfigError::InvalidValue {
                field: "store.secret_threshold",
                reason: format!(
                    "threshold {} exceeds total shares {}",
                    self.store.secret_threshold, self.store.secret_shares
                ),
            }
            .into());
        }

        if self.persistence.folder.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "persistence.folder",
            }
            .into());
        }

        for db in &self.databases {
            if db.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "databases.name",
                    reason: "database name must not be empty".to_string(),
                }
                .into());
            }
        }

        if let Some(cert) = &self.certificate {
            if cert.store_path.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "certificate.store_path",
                }
                .into());
            }
        }

        Ok(())
    }
}

impl StoreConfig {
    /// Base URL of the engine's administrative API.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[store]
host = "localhost"
port = 8200

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.store.protocol, "https");
        assert_eq!(config.store.secret_threshold, 3);
        assert_eq!(config.store.secret_shares, 5);
        assert!(config.store.revoke_root_tokens);
        assert_eq!(config.persistence.file, "init-material.json");
        assert!(config.token_provider.is_none());
        assert!(config.databases.is_empty());
        assert_eq!(config.store.base_url(), "https://localhost:8200");
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
[store]
protocol = "http"
host = "vault.internal"
port = 8200
secret_threshold = 2
secret_shares = 3
revoke_root_tokens = false

[persistence]
folder = "/run/turnkey"
file = "material.json"

[password]
program = "/usr/bin/passgen"
args = ["--length", "32"]

[token_provider]
program = "token-provider"
kind = "long-running"
admin_token_path = "/run/turnkey/admin-token.json"

[[databases]]
service = "core-data"
name = "redisdb"

[[databases]]
service = "core-metadata"
name = "redisdb"

[certificate]
store_path = "edgex/certs/proxy"
cert_file = "/etc/ssl/proxy.crt"
key_file = "/etc/ssl/proxy.key"
"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.databases.len(), 2);
        let provider = config.token_provider.unwrap();
        assert_eq!(provider.kind, ProviderKind::LongRunning);
        assert!(!config.store.revoke_root_tokens);
        assert_eq!(config.certificate.unwrap().store_path, "edgex/certs/proxy");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/turnkey.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_threshold_exceeding_shares_rejected() {
        let file = write_config(
            r#"
[store]
host = "localhost"
port = 8200
secret_threshold = 6
secret_shares = 5

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
        );
        let result = Config::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let file = write_config(
            r#"
[store]
host = "localhost"
port = 8200
secret_threshold = 0

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_bad_protocol_rejected() {
        let file = write_config(
            r#"
[store]
protocol = "ftp"
host = "localhost"
port = 8200

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_database_name_rejected() {
        let file = write_config(
            r#"
[store]
host = "localhost"
port = 8200

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"

[[databases]]
service = "core-data"
name = ""
"#,
        );
        assert!(Config::load(file.path()).is_err());
    }
}
