//! Pure connection configuration for the MQTT adapter
//!
//! Builds rumqttc options from [`AgentConfig`] and holds the small value
//! types shared between the client and its event-loop driver.

use crate::config::AgentConfig;
use crate::transport::BrokerError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::path::Path;
use std::time::Duration;

/// ALPN protocol AWS IoT requires for MQTT over port 443
pub const AWS_IOT_ALPN: &[u8] = b"x-amzn-mqtt-ca";

/// Port on which ALPN negotiation is needed
pub const ALPN_PORT: u16 = 443;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// TLS material for mutual authentication
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl TlsMaterial {
    /// Read the three PEM files named in the configuration
    pub fn load(config: &AgentConfig) -> Result<Self, BrokerError> {
        Ok(Self {
            ca: read_credential(&config.broker.root_ca_path)?,
            certificate: read_credential(&config.broker.certificate_path)?,
            private_key: read_credential(&config.broker.private_key_path)?,
        })
    }
}

fn read_credential(path: &Path) -> Result<Vec<u8>, BrokerError> {
    std::fs::read(path).map_err(|source| BrokerError::Credentials {
        path: path.display().to_string(),
        source,
    })
}

/// Runtime knobs for the client that do not live in `MqttOptions`
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub offline_queue_depth: usize,
    pub drain_interval: Duration,
}

impl BrokerSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            client_id: config.device.client_id.clone(),
            host: config.broker.host.clone(),
            port: config.broker.port,
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            offline_queue_depth: config.broker.offline_queue_depth,
            drain_interval: config.drain_interval(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pure function to configure MQTT options for a persistent session
pub fn configure_mqtt_options(settings: &BrokerSettings, tls: TlsMaterial) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);

    let alpn = (settings.port == ALPN_PORT).then(|| vec![AWS_IOT_ALPN.to_vec()]);
    let transport =
        RumqttcTransport::tls(tls.ca, Some((tls.certificate, tls.private_key)), alpn);
    mqtt_options.set_transport(transport);

    // Keep the session so QoS 1 state survives a reconnect
    mqtt_options.set_clean_start(false);
    mqtt_options.set_keep_alive(KEEP_ALIVE);
    mqtt_options.set_pending_throttle(settings.drain_interval);

    mqtt_options
}

/// Link health as seen by the event-loop driver
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    Down(String),
    Up,
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up)
    }
}
