//! Configuration loading and validation tests
//!
//! Tests focus on the observable outcome of loading a file: accepted values,
//! applied defaults and rejected combinations.

use smarthome_ingest::config::{BrokerProtocol, ConfigError, ServiceConfig, StorageBackend};
use smarthome_ingest::Focus;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[service]
client_id = "backend-eu"

[mqtt]
host = "broker.example.net"
protocol = "mqtts"
username = "backend"
password_env = "SMARTHOME_TEST_BROKER_PASSWORD"

[storage]
backend = "sqlite"
path = "/var/lib/smarthome/smarthome.db"

[focus]
user_id = 4
home_id = 11
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.service.client_id, "backend-eu");
    assert_eq!(config.mqtt.host, "broker.example.net");
    assert_eq!(config.mqtt.protocol, BrokerProtocol::Mqtts);
    assert_eq!(config.mqtt.port(), 8883);
    assert_eq!(config.mqtt.username.as_deref(), Some("backend"));
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(
        config.storage.path,
        Some(PathBuf::from("/var/lib/smarthome/smarthome.db"))
    );
    assert_eq!(config.focus.map(Focus::from), Some(Focus::new(4, 11)));
}

#[test]
fn test_config_applies_defaults() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "localhost"

[storage]
backend = "memory"
"#,
    );

    let config = ServiceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.service.client_id, "smarthome-backend");
    assert_eq!(config.mqtt.protocol, BrokerProtocol::Mqtts);
    assert_eq!(config.mqtt.reconnect_interval_ms, 1000);
    assert_eq!(config.mqtt.keep_alive_secs, 60);
    assert_eq!(config.mqtt.operation_timeout_ms, 5000);
    assert_eq!(config.mqtt.max_reconnect_attempts, None);
    assert_eq!(config.ingest.channel_capacity, 256);
    assert!(config.focus.is_none());
}

#[test]
fn test_explicit_port_overrides_protocol_default() {
    let config = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"
protocol = "mqtt"
port = 11883

[storage]
backend = "memory"
"#,
    )
    .unwrap();
    assert_eq!(config.mqtt.port(), 11883);
}

#[test]
fn test_reconnect_budget_is_optional() {
    let config = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"
reconnect_interval_ms = 250
max_reconnect_attempts = 8

[storage]
backend = "memory"
"#,
    )
    .unwrap();
    assert_eq!(config.mqtt.max_reconnect_attempts, Some(8));
}

#[test]
fn test_sqlite_backend_requires_path() {
    let err = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"

[storage]
backend = "sqlite"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConfig(msg) if msg.contains("storage.path")));
}

#[test]
fn test_rejects_zero_timeouts_and_capacity() {
    for (section, key) in [
        ("mqtt", "reconnect_interval_ms"),
        ("mqtt", "operation_timeout_ms"),
        ("mqtt", "max_reconnect_attempts"),
        ("ingest", "channel_capacity"),
    ] {
        let mut content = String::from("[storage]\nbackend = \"memory\"\n");
        if section == "mqtt" {
            content.push_str(&format!("[mqtt]\nhost = \"localhost\"\n{key} = 0\n"));
        } else {
            content.push_str(&format!("[mqtt]\nhost = \"localhost\"\n[{section}]\n{key} = 0\n"));
        }
        let err = ServiceConfig::from_toml_str(&content).unwrap_err();
        assert!(
            matches!(&err, ConfigError::InvalidConfig(msg) if msg.contains(key)),
            "unexpected error for {key}: {err}"
        );
    }
}

#[test]
fn test_rejects_unknown_backend() {
    let err = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"

[storage]
backend = "postgres"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_missing_file_is_reported() {
    let err = ServiceConfig::load_from_file(std::path::Path::new("/nonexistent/smarthome.toml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileRead(_)));
}

#[test]
fn test_password_resolution_prefers_environment() {
    let mut config = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"
password = "inline-secret"
password_env = "SMARTHOME_TEST_PASSWORD_PREFERRED"

[storage]
backend = "memory"
"#,
    )
    .unwrap();

    std::env::remove_var("SMARTHOME_TEST_PASSWORD_PREFERRED");
    assert_eq!(config.mqtt.resolve_password().as_deref(), Some("inline-secret"));

    std::env::set_var("SMARTHOME_TEST_PASSWORD_PREFERRED", "env-secret");
    assert_eq!(config.mqtt.resolve_password().as_deref(), Some("env-secret"));
    std::env::remove_var("SMARTHOME_TEST_PASSWORD_PREFERRED");

    config.mqtt.password = None;
    assert!(matches!(
        config.require_password_env(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "SMARTHOME_TEST_PASSWORD_PREFERRED"
    ));
}

#[test]
fn test_redacted_config_hides_password() {
    let config = ServiceConfig::from_toml_str(
        r#"
[mqtt]
host = "localhost"
password = "hunter2"

[storage]
backend = "memory"
"#,
    )
    .unwrap();

    let shown = toml::to_string_pretty(&config.redacted()).unwrap();
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("***"));
    assert_eq!(config.mqtt.password.as_deref(), Some("hunter2"));
}
