//! Bridge configuration
//!
//! Loaded from a TOML file, or from the same environment variables the
//! deployed bridge has always used when no file is given. Secrets are never
//! stored in the configuration itself: sections name the environment
//! variable that holds them and the value is read when it is needed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub store: StoreSection,
    #[serde(default)]
    pub bridge: BridgeSection,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    #[serde(default = "default_username_env")]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    /// Client id prefix; a millisecond timestamp is appended on connect
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Give up after this many reconnection attempts (default: never)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_username_env() -> Option<String> {
    Some("MQTT_USER".to_string())
}

fn default_password_env() -> Option<String> {
    Some("MQTT_PASSWORD".to_string())
}

fn default_client_id_prefix() -> String {
    "esp-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            max_reconnect_attempts: None,
        }
    }
}

impl MqttSection {
    /// Username and password, only when both variables are set
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = get_env_var_optional(self.username_env.as_deref())?;
        let password = get_env_var_optional(self.password_env.as_deref())?;
        Some((username, password))
    }
}

/// Backing store section (Supabase REST endpoint)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// Project URL, e.g. https://xyz.supabase.co
    pub url: String,
    /// Environment variable containing the service key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Non-default Postgres schema exposed through the REST API
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    /// Probe the store once at startup
    #[serde(default = "default_true")]
    pub verify_on_start: bool,
}

fn default_api_key_env() -> String {
    "SUPABASE_KEY".to_string()
}

fn default_store_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl StoreSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read the service key from the environment
    pub fn api_key(&self) -> Result<String, ConfigError> {
        get_env_var_required(&self.api_key_env)
    }
}

/// Runtime tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Capacity of the broker-to-dispatcher channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a file if given, otherwise from the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::from_env(),
        }
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable lookup (pure function)
    ///
    /// `MQTT_HOST` is a bare host name; the broker is always reached over
    /// TLS on 8883.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::EnvVarNotFound(name.to_string()))
        };

        let host = required("MQTT_HOST")?;
        let broker_url = if host.contains("://") {
            host
        } else {
            format!("mqtts://{host}:8883")
        };

        let config = BridgeConfig {
            mqtt: MqttSection {
                broker_url,
                ..MqttSection::default()
            },
            store: StoreSection {
                url: required("SUPABASE_URL")?,
                api_key_env: default_api_key_env(),
                schema: None,
                timeout_secs: default_store_timeout(),
                verify_on_start: true,
            },
            bridge: BridgeSection::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check URLs and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.mqtt.broker_url, &["mqtt", "mqtts", "tcp", "ssl"], "mqtt.broker_url")?;
        validate_url(&self.store.url, &["http", "https"], "store.url")?;

        if self.bridge.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.store.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "store.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Human readable summary; shows whether secrets are set, never their values
    pub fn describe(&self) -> String {
        let env_status = |name: Option<&str>| match name {
            Some(name) if get_env_var_optional(Some(name)).is_some() => format!("{name} (set)"),
            Some(name) => format!("{name} (not set)"),
            None => "-".to_string(),
        };

        let mut lines = vec![
            "[mqtt]".to_string(),
            format!("broker_url = {}", self.mqtt.broker_url),
            format!("username = {}", env_status(self.mqtt.username_env.as_deref())),
            format!("password = {}", env_status(self.mqtt.password_env.as_deref())),
            format!("client_id_prefix = {}", self.mqtt.client_id_prefix),
            format!("keep_alive_secs = {}", self.mqtt.keep_alive_secs),
            format!(
                "max_reconnect_attempts = {}",
                self.mqtt
                    .max_reconnect_attempts
                    .map_or("unlimited".to_string(), |n| n.to_string())
            ),
            String::new(),
            "[store]".to_string(),
            format!("url = {}", self.store.url),
            format!("api_key = {}", env_status(Some(&self.store.api_key_env))),
            format!("timeout_secs = {}", self.store.timeout_secs),
            format!("verify_on_start = {}", self.store.verify_on_start),
        ];
        if let Some(schema) = &self.store.schema {
            lines.push(format!("schema = {schema}"));
        }
        lines.push(String::new());
        lines.push("[bridge]".to_string());
        lines.push(format!(
            "channel_capacity = {}",
            self.bridge.channel_capacity
        ));
        lines.join("\n")
    }
}

fn validate_url(value: &str, schemes: &[&str], field: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidConfig(format!("{field} '{value}' is not a URL: {e}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must use one of [{}], got '{}'",
            schemes.join(", "),
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} '{value}' has no host"
        )));
    }
    Ok(())
}

/// Helper to get an environment variable, treating empty values as unset
fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name
        .and_then(|name| std::env::var(name).ok())
        .filter(|value| !value.is_empty())
}

/// Helper to get an environment variable with error propagation
fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    get_env_var_optional(Some(env_var_name))
        .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}
