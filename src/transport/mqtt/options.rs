//! rumqttc options from [`MqttSection`]

use super::state::MqttError;
use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as WireTransport;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Where and how to reach the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse `mqtt[s]://host[:port]`; `tcp`/`ssl` are accepted aliases (pure function)
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let invalid = || MqttError::InvalidBrokerUrl(broker_url.to_string());
        let url = Url::parse(broker_url).map_err(|_| invalid())?;

        let tls = match url.scheme() {
            "mqtts" | "ssl" => true,
            "mqtt" | "tcp" => false,
            _ => return Err(invalid()),
        };
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(if tls { 8883 } else { 1883 }),
            tls,
        })
    }
}

/// `<prefix>-<unix millis>`, unique enough that two bridges never share a session
pub fn client_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{prefix}-{millis}")
}

/// Build rumqttc options; credentials are read from the environment here
pub fn mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let endpoint = BrokerEndpoint::parse(&config.broker_url)?;
    let mut options = MqttOptions::new(
        client_id(&config.client_id_prefix),
        endpoint.host,
        endpoint.port,
    );

    if endpoint.tls {
        options.set_transport(WireTransport::tls_with_default_config());
    }
    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    Ok(options)
}
