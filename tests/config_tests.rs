//! Tests for configuration management through the public API.

use std::io::Write;
use tempfile::NamedTempFile;
use turnkey::core::config::{Config, ProviderKind};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
[store]
host = "edgex-vault"
port = 8200

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.store.base_url(), "https://edgex-vault:8200");
    assert_eq!(config.store.secret_threshold, 3);
    assert_eq!(config.store.secret_shares, 5);
    assert!(config.store.revoke_root_tokens);
}

#[test]
fn test_load_database_entries() {
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
name = "redisdb"

[[databases]]
service = "support-notifications"
name = "redisdb"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.databases.len(), 2);
    assert!(config
        .databases
        .iter()
        .all(|db| db.name == "redisdb"));
}

#[test]
fn test_provider_kind_defaults_to_oneshot() {
    let file = write_config(
        r#"
[store]
host = "localhost"
port = 8200

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"

[token_provider]
program = "token-provider"
admin_token_path = "/run/turnkey/admin-token.json"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.token_provider.unwrap().kind, ProviderKind::Oneshot);
}

#[test]
fn test_unknown_keys_are_rejected() {
    let file = write_config(
        r#"
[store]
host = "localhost"
port = 8200
shres = 5

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
    );

    assert!(Config::load(file.path()).is_err());
}
