//! CLI-level tests for the turnkey binary.
//!
//! These never reach a live engine: they exercise argument parsing, config
//! loading and the error surface that precedes any network activity.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn turnkey() -> Command {
    Command::cargo_bin("turnkey").expect("failed to find turnkey binary")
}

#[test]
fn test_help_describes_the_tool() {
    turnkey()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("secret store"))
        .stdout(predicate::str::contains("--insecure-skip-verify"))
        .stdout(predicate::str::contains("--interval"));
}

#[test]
fn test_version_prints_crate_version() {
    turnkey()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_config_file_fails() {
    turnkey()
        .args(["--config", "/nonexistent/turnkey.toml"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("bootstrap failed"));
}

#[test]
fn test_malformed_config_fails() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"this is { not toml").unwrap();

    turnkey()
        .args(["--config", file.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_invalid_config_values_fail() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[store]
host = "localhost"
port = 8200
secret_threshold = 9
secret_shares = 5

[persistence]
folder = "/run/turnkey"

[password]
program = "passgen"
"#,
    )
    .unwrap();

    turnkey()
        .args(["--config", file.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("secret_threshold"));
}

#[test]
fn test_unknown_flag_is_rejected() {
    turnkey().arg("--no-such-flag").assert().failure();
}
