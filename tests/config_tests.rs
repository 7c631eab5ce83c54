//! Configuration system tests
//!
//! Loads, validates and overrides configuration through the binary.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn validate(&self) -> assert_cmd::assert::Assert {
        Command::cargo_bin("spool-link")
            .unwrap()
            .env_remove("SPOOL_LINK_HOST")
            .env_remove("SPOOL_LINK_PATH")
            .env_remove("SPOOL_LINK_TLS")
            .env_remove("SPOOL_LINK_LOG_LEVEL")
            .env_remove("SPOOL_LINK_RECONNECT_STRATEGY")
            .args(["config", "validate", "--config", self.path()])
            .assert()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    fixture
        .validate()
        .success()
        .stdout(predicate::str::contains("ws://filaman.local/ws"));
}

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
host = "192.168.1.50"
"#,
    );

    fixture
        .validate()
        .success()
        .stdout(predicate::str::contains("ws://192.168.1.50/ws"));
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
host = "spools.lan:8443"
path = "/socket"
tls = true

[connection]
heartbeat_interval_ms = 5000
heartbeat_timeout_ms = 15000
reconnect_delay_ms = 2000
connect_timeout_ms = 3000
reconnect_strategy = "exponential"
max_reconnect_delay_ms = 30000

[logging]
level = "debug"
max_files = 3
json_format = true
"#,
    );

    fixture
        .validate()
        .success()
        .stdout(predicate::str::contains("wss://spools.lan:8443/socket"));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_host() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
host = "  "
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("host cannot be empty"));
}

#[test]
fn test_path_without_leading_slash() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
path = "ws"
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("must start with '/'"));
}

#[test]
fn test_timeout_shorter_than_interval() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
heartbeat_interval_ms = 10000
heartbeat_timeout_ms = 5000
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("heartbeat_interval_ms"));
}

#[test]
fn test_zero_reconnect_delay() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
reconnect_delay_ms = 0
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("greater than zero"));
}

#[test]
fn test_exponential_ceiling_below_initial_delay() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
reconnect_strategy = "exponential"
reconnect_delay_ms = 5000
max_reconnect_delay_ms = 1000
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("reconnect_delay_ms"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "loud"
"#,
    );

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("Invalid log level 'loud'"));
}

#[test]
fn test_invalid_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[device\nhost = ");

    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("Failed to parse configuration"));
}

#[test]
fn test_wrong_value_type() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
heartbeat_interval_ms = "often"
"#,
    );

    fixture.validate().code(10);
}

// ─────────────────────────────────────────────────────────────────
// Environment Overrides
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_host() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
host = "from-file.local"
"#,
    );

    Command::cargo_bin("spool-link")
        .unwrap()
        .env("SPOOL_LINK_HOST", "from-env.local")
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://from-env.local/ws"));
}

#[test]
fn test_env_enables_tls() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    Command::cargo_bin("spool-link")
        .unwrap()
        .env_remove("SPOOL_LINK_HOST")
        .env("SPOOL_LINK_TLS", "1")
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("wss://filaman.local/ws"));
}

// ─────────────────────────────────────────────────────────────────
// Show
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[device]
host = "10.0.0.7"

[connection]
reconnect_delay_ms = 7000
"#,
    );

    Command::cargo_bin("spool-link")
        .unwrap()
        .env_remove("SPOOL_LINK_HOST")
        .env_remove("SPOOL_LINK_RECONNECT_DELAY_MS")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("[device]"))
        .stdout(predicate::str::contains("host = \"10.0.0.7\""))
        .stdout(predicate::str::contains("reconnect_delay_ms = 7000"))
        .stdout(predicate::str::contains("heartbeat_timeout_ms = 20000"))
        .stdout(predicate::str::contains("# endpoint: ws://10.0.0.7/ws"));
}
