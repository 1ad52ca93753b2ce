//! Database credential provisioning.
//!
//! Each credential pair is written to two KV paths: a service-scoped path
//! (`edgex/<service>/<db>`) read by the owning microservice, and a
//! database-scoped path (`edgex/<db>/<service>`) enumerated when the
//! database itself is initialized. The target database supports only a
//! single shared credential set, so one generated pair is shared by every
//! service configured against the same database.
//!
//! Every write is preceded by an existence probe, which makes repeated
//! bootstrap runs idempotent and preserves credentials rotated out of band.

use std::collections::BTreeMap;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::client::EngineApi;
use crate::core::config::DatabaseInfo;
use crate::core::constants;
use crate::core::password::PasswordProvider;
use crate::error::{ProvisionError, Result};

/// A username/password pair shared across one database's services.
pub struct CredentialPair {
    pub username: String,
    pub password: Zeroizing<String>,
}

pub struct CredentialProvisioner<'a, A: EngineApi> {
    api: &'a A,
    token: &'a str,
    generator: &'a PasswordProvider<'a>,
}

impl<'a, A: EngineApi> CredentialProvisioner<'a, A> {
    pub fn new(api: &'a A, token: &'a str, generator: &'a PasswordProvider<'a>) -> Self {
        Self {
            api,
            token,
            generator,
        }
    }

    /// Provision credentials for every configured `(service, database)`
    /// entry. One pair is generated per distinct database and uploaded to
    /// both path shapes, skipping paths that already exist.
    pub fn provision(&self, databases: &[DatabaseInfo]) -> Result<()> {
        let mut pairs: BTreeMap<&str, CredentialPair> = BTreeMap::new();
        for db in databases {
            if !pairs.contains_key(db.name.as_str()) {
                let password = self.generator.generate()?;
                pairs.insert(
                    db.name.as_str(),
                    CredentialPair {
                        username: db.name.clone(),
                        password,
                    },
                );
            }
        }

        for db in databases {
            if db.service.is_empty() {
                continue;
            }
            let pair = &pairs[db.name.as_str()];

            let service_path = format!(
                "{}/{}/{}",
                constants::SECRET_BASE_PATH,
                db.service,
                db.name
            );
            self.add_credential(&service_path, pair)?;

            let database_path = format!(
                "{}/{}/{}",
                constants::SECRET_BASE_PATH,
                db.name,
                db.service
            );
            self.add_credential(&database_path, pair)?;
        }

        Ok(())
    }

    /// Upload a pair to one path unless it is already present.
    fn add_credential(&self, path: &str, pair: &CredentialPair) -> Result<()> {
        if self.already_in_store(path)? {
            info!(path, "credentials already present, skipping");
            return Ok(());
        }
        self.upload_to_store(pair, path)?;
        debug!(path, "credentials uploaded");
        Ok(())
    }

    /// Probe whether a secret exists at `path`.
    pub fn already_in_store(&self, path: &str) -> Result<bool> {
        self.api
            .secret_exists(self.token, path)
            .map_err(|source| {
                ProvisionError::Probe {
                    path: path.to_string(),
                    source,
                }
                .into()
            })
    }

    /// Write a pair to `path`. Callers check `already_in_store` first.
    pub fn upload_to_store(&self, pair: &CredentialPair, path: &str) -> Result<()> {
        let value = serde_json::json!({
            "username": pair.username,
            "password": &*pair.password,
        });
        self.api
            .write_secret(self.token, path, &value)
            .map_err(|source| {
                ProvisionError::Upload {
                    path: path.to_string(),
                    source,
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PasswordConfig;
    use crate::core::testing::MockEngine;
    use std::path::PathBuf;

    fn password_config() -> PasswordConfig {
        PasswordConfig {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "printf 'generated-pw'".to_string()],
        }
    }

    fn databases(entries: &[(&str, &str)]) -> Vec<DatabaseInfo> {
        entries
            .iter()
            .map(|(service, name)| DatabaseInfo {
                service: service.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    // Scenario D: two services against one database get exactly two
    // service-scoped entries plus the database-scoped entries, all with one
    // identical generated password.
    #[test]
    fn test_two_services_share_one_password() {
        let api = MockEngine::new();
        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);

        provisioner
            .provision(&databases(&[("a", "redisdb"), ("b", "redisdb")]))
            .unwrap();

        let kv = api.kv.lock().unwrap();
        assert_eq!(kv.len(), 4);
        for path in [
            "edgex/a/redisdb",
            "edgex/b/redisdb",
            "edgex/redisdb/a",
            "edgex/redisdb/b",
        ] {
            let entry = kv.get(path).unwrap_or_else(|| panic!("missing {}", path));
            assert_eq!(entry["username"], "redisdb");
            assert_eq!(entry["password"], "generated-pw");
        }
        drop(kv);

        assert_eq!(api.call_count("write:"), 4);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let api = MockEngine::new();
        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);
        let targets = databases(&[("a", "redisdb")]);

        provisioner.provision(&targets).unwrap();
        assert_eq!(api.call_count("write:"), 2);

        provisioner.provision(&targets).unwrap();
        // The existence probes short-circuit; no further writes.
        assert_eq!(api.call_count("write:"), 2);
        assert_eq!(api.call_count("exists:"), 4);
    }

    #[test]
    fn test_partial_presence_fills_only_the_gap() {
        let api = MockEngine::new();
        api.kv.lock().unwrap().insert(
            "edgex/a/redisdb".to_string(),
            serde_json::json!({"username": "redisdb", "password": "older"}),
        );

        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);

        provisioner.provision(&databases(&[("a", "redisdb")])).unwrap();

        let kv = api.kv.lock().unwrap();
        // The existing entry is untouched, the missing one was filled.
        assert_eq!(kv["edgex/a/redisdb"]["password"], "older");
        assert_eq!(kv["edgex/redisdb/a"]["password"], "generated-pw");
    }

    #[test]
    fn test_entry_without_service_is_skipped() {
        let api = MockEngine::new();
        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);

        provisioner.provision(&databases(&[("", "redisdb")])).unwrap();
        assert_eq!(api.call_count("write:"), 0);
    }

    #[test]
    fn test_upload_failure_is_fatal() {
        let api = MockEngine::new();
        api.fail_writes
            .lock()
            .unwrap()
            .insert("edgex/a/redisdb".to_string());

        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);

        let err = provisioner
            .provision(&databases(&[("a", "redisdb")]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Fatal);
    }

    #[test]
    fn test_distinct_databases_get_distinct_generations() {
        let api = MockEngine::new();
        // A strategy with random output would give different passwords per
        // database; here we only count invocations.
        let config = password_config();
        let generator = PasswordProvider::new(&config);
        let provisioner = CredentialProvisioner::new(&api, "root", &generator);

        provisioner
            .provision(&databases(&[("a", "redisdb"), ("b", "postgres")]))
            .unwrap();

        let kv = api.kv.lock().unwrap();
        assert_eq!(kv.len(), 4);
        assert_eq!(kv["edgex/a/redisdb"]["username"], "redisdb");
        assert_eq!(kv["edgex/b/postgres"]["username"], "postgres");
    }
}
