//! Configuration loading from files and variable lookups

use esp_mqtt_bridge::config::{BridgeConfig, ConfigError};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn test_load_full_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "mqtts://broker.example.com:8883"
username_env = "BROKER_USER"
password_env = "BROKER_PASS"
client_id_prefix = "escape-room"
keep_alive_secs = 30
max_reconnect_attempts = 5

[store]
url = "https://project.supabase.co"
api_key_env = "SERVICE_ROLE_KEY"
schema = "game"
timeout_secs = 3
verify_on_start = false

[bridge]
channel_capacity = 64
"#
    )
    .unwrap();

    let config = BridgeConfig::load(Some(temp_file.path())).unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtts://broker.example.com:8883");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("BROKER_USER"));
    assert_eq!(config.mqtt.client_id_prefix, "escape-room");
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.mqtt.max_reconnect_attempts, Some(5));
    assert_eq!(config.store.api_key_env, "SERVICE_ROLE_KEY");
    assert_eq!(config.store.schema.as_deref(), Some("game"));
    assert_eq!(config.store.timeout(), Duration::from_secs(3));
    assert!(!config.store.verify_on_start);
    assert_eq!(config.bridge.channel_capacity, 64);
}

#[test]
fn test_minimal_file_uses_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[store]
url = "http://localhost:54321"
"#
    )
    .unwrap();

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USER"));
    assert_eq!(config.mqtt.password_env.as_deref(), Some("MQTT_PASSWORD"));
    assert_eq!(config.mqtt.max_reconnect_attempts, None);
    assert_eq!(config.store.api_key_env, "SUPABASE_KEY");
    assert_eq!(config.store.timeout(), Duration::from_secs(10));
    assert!(config.store.verify_on_start);
    assert_eq!(config.bridge.channel_capacity, 256);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = BridgeConfig::load_from_file(std::path::Path::new("/nonexistent/bridge.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[mqtt\nbroker_url = ").unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_file_with_wrong_broker_scheme_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "http://broker.example.com"

[store]
url = "https://project.supabase.co"
"#
    )
    .unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_zero_channel_capacity_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[store]
url = "http://localhost:54321"

[bridge]
channel_capacity = 0
"#
    )
    .unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_env_lookup_builds_tls_broker_url() {
    let config = BridgeConfig::from_lookup(lookup_from(&[
        ("MQTT_HOST", "abc.s1.eu.hivemq.cloud"),
        ("SUPABASE_URL", "https://project.supabase.co"),
    ]))
    .unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtts://abc.s1.eu.hivemq.cloud:8883");
    assert_eq!(config.store.url, "https://project.supabase.co");
}

#[test]
fn test_env_lookup_keeps_explicit_broker_url() {
    let config = BridgeConfig::from_lookup(lookup_from(&[
        ("MQTT_HOST", "mqtt://localhost:1883"),
        ("SUPABASE_URL", "http://localhost:54321"),
    ]))
    .unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
}

#[test]
fn test_env_lookup_requires_host_and_store_url() {
    let missing_host =
        BridgeConfig::from_lookup(lookup_from(&[("SUPABASE_URL", "https://p.supabase.co")]));
    assert!(matches!(missing_host, Err(ConfigError::EnvVarNotFound(name)) if name == "MQTT_HOST"));

    let missing_store = BridgeConfig::from_lookup(lookup_from(&[("MQTT_HOST", "broker")]));
    assert!(matches!(missing_store, Err(ConfigError::EnvVarNotFound(name)) if name == "SUPABASE_URL"));
}

#[test]
fn test_blank_variable_counts_as_missing() {
    let result = BridgeConfig::from_lookup(lookup_from(&[
        ("MQTT_HOST", "  "),
        ("SUPABASE_URL", "https://project.supabase.co"),
    ]));
    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
}

#[test]
fn test_describe_never_prints_secret_values() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "ESP_BRIDGE_TEST_DESCRIBE_USER"

[store]
url = "http://localhost:54321"
api_key_env = "ESP_BRIDGE_TEST_DESCRIBE_KEY"
"#
    )
    .unwrap();

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();
    let described = config.describe();

    assert!(described.contains("ESP_BRIDGE_TEST_DESCRIBE_USER (not set)"));
    assert!(described.contains("ESP_BRIDGE_TEST_DESCRIBE_KEY (not set)"));
    assert!(described.contains("mqtt://localhost:1883"));
}
