//! Agent configuration loaded from environment-style key/value pairs
//!
//! Values come from the process environment, optionally seeded from a
//! dotenv file. Everything is validated once at startup; the resulting
//! [`AgentConfig`] is immutable and shared read-only by every component.

use crate::agent::edge_detector::EdgeTrigger;
use crate::protocol::{validate_publish_topic, TopicError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub device: DeviceSection,
    pub broker: BrokerSection,
    pub topics: TopicSection,
    pub schedule: ScheduleSection,
}

/// Physical device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// MQTT client identifier (CLIENT)
    pub client_id: String,
    /// sysfs GPIO line number (GPIO_PIN)
    pub gpio_pin: u32,
    /// Invert the raw level (GPIO_ACTIVE_LOW)
    ///
    /// Inversion does not bias the line. The input still needs an external
    /// or device-tree pull-up, since sysfs cannot enable one.
    pub gpio_active_low: bool,
    /// UTC offset for event timestamps (TIMEZONE_OFFSET_HOURS)
    pub timezone_offset_hours: i32,
}

/// Broker endpoint, credentials and client queueing knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    pub root_ca_path: PathBuf,
    pub private_key_path: PathBuf,
    pub certificate_path: PathBuf,
    /// Requests the client accepts while the link is down
    pub offline_queue_depth: usize,
    /// Replayed messages per second after a reconnect
    pub draining_frequency: u32,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

/// Publish topics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSection {
    pub sensor: String,
    /// Defaults to the sensor topic
    pub heartbeat: String,
}

/// Loop periods and detection policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSection {
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect_interval_secs: u64,
    pub inactivity_threshold_hours: Option<u64>,
    pub edge_trigger: EdgeTrigger,
}

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_OFFLINE_QUEUE_DEPTH: usize = 1000;
pub const DEFAULT_DRAINING_FREQUENCY: u32 = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 5;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Invalid topic in {key}: {source}")]
    InvalidTopic {
        key: String,
        #[source]
        source: TopicError,
    },
    #[error("Invalid broker endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error("Failed to load env file {path}: {reason}")]
    EnvFile { path: PathBuf, reason: String },
}

/// Merge a dotenv file into the process environment
///
/// With an explicit path the file must exist. Without one, `.env` in the
/// working directory (or a parent) is used when present. Variables already
/// set in the environment win over the file.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(path) => dotenv::from_path(path)
            .map(|_| Some(path.to_path_buf()))
            .map_err(|e| ConfigError::EnvFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        None => Ok(dotenv::dotenv().ok()),
    }
}

impl AgentConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reader = EnvReader::new(lookup);

        let client_id = reader.required("CLIENT");
        let endpoint = reader.required("ENDPOINT_URL");
        let root_ca = reader.required("AWS_ROOT_CA_PATH");
        let private_key = reader.required("AWS_PRIVATE_KEY_PATH");
        let certificate = reader.required("AWS_CERTIFICATE_PATH");
        let sensor_topic = reader.required("SENSOR_TOPIC");
        let heartbeat_interval = reader.required_any(&["PUBLISH_INTERVAL", "INTERVAL"]);
        let gpio_pin = reader.required("GPIO_PIN");

        let missing = reader.take_missing();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        // All required keys are present past this point
        let client_id = client_id.unwrap_or_default();
        let endpoint = endpoint.unwrap_or_default();
        let sensor_topic = sensor_topic.unwrap_or_default();
        let (heartbeat_key, heartbeat_raw) = heartbeat_interval.unwrap_or_default();

        let default_port = reader.parse_or("ENDPOINT_PORT", DEFAULT_PORT)?;
        let (host, port) = parse_endpoint(&endpoint, default_port)?;

        validate_publish_topic(&sensor_topic).map_err(|source| ConfigError::InvalidTopic {
            key: "SENSOR_TOPIC".to_string(),
            source,
        })?;
        let heartbeat_topic = match reader.optional("HEARTBEAT_TOPIC") {
            Some(topic) => {
                validate_publish_topic(&topic).map_err(|source| ConfigError::InvalidTopic {
                    key: "HEARTBEAT_TOPIC".to_string(),
                    source,
                })?;
                topic
            }
            None => sensor_topic.clone(),
        };

        let timezone_offset_hours: i32 = reader.parse_or("TIMEZONE_OFFSET_HOURS", 0)?;
        if !(-23..=23).contains(&timezone_offset_hours) {
            return Err(invalid(
                "TIMEZONE_OFFSET_HOURS",
                &timezone_offset_hours.to_string(),
                "must be between -23 and 23",
            ));
        }

        let config = AgentConfig {
            device: DeviceSection {
                client_id,
                gpio_pin: parse_value("GPIO_PIN", &gpio_pin.unwrap_or_default())?,
                gpio_active_low: reader.parse_bool_or("GPIO_ACTIVE_LOW", false)?,
                timezone_offset_hours,
            },
            broker: BrokerSection {
                host,
                port,
                root_ca_path: PathBuf::from(root_ca.unwrap_or_default()),
                private_key_path: PathBuf::from(private_key.unwrap_or_default()),
                certificate_path: PathBuf::from(certificate.unwrap_or_default()),
                offline_queue_depth: reader
                    .parse_positive_or("OFFLINE_QUEUE_DEPTH", DEFAULT_OFFLINE_QUEUE_DEPTH)?,
                draining_frequency: reader
                    .parse_positive_or("DRAINING_FREQUENCY", DEFAULT_DRAINING_FREQUENCY)?,
                connect_timeout_secs: reader
                    .parse_positive_or("CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS)?,
                operation_timeout_secs: reader
                    .parse_positive_or("OPERATION_TIMEOUT", DEFAULT_OPERATION_TIMEOUT_SECS)?,
            },
            topics: TopicSection {
                sensor: sensor_topic,
                heartbeat: heartbeat_topic,
            },
            schedule: ScheduleSection {
                poll_interval_secs: reader
                    .parse_positive_or("POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)?,
                heartbeat_interval_secs: parse_positive(heartbeat_key, &heartbeat_raw)?,
                reconnect_interval_secs: reader
                    .parse_positive_or("RECONNECTION_INTERVAL", DEFAULT_RECONNECT_INTERVAL_SECS)?,
                inactivity_threshold_hours: match reader.optional("INACTIVITY_THRESHOLD_HOURS") {
                    Some(raw) => Some(parse_positive("INACTIVITY_THRESHOLD_HOURS", &raw)?),
                    None => None,
                },
                edge_trigger: match reader.optional("EDGE_TRIGGER") {
                    Some(raw) => parse_value("EDGE_TRIGGER", &raw)?,
                    None => EdgeTrigger::default(),
                },
            },
        };

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.heartbeat_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.reconnect_interval_secs)
    }

    pub fn inactivity_threshold(&self) -> Option<Duration> {
        self.schedule
            .inactivity_threshold_hours
            .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.operation_timeout_secs)
    }

    /// Spacing between replayed messages after a reconnect
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(1) / self.broker.draining_frequency.max(1)
    }
}

/// Accumulates missing required keys so they are reported together
struct EnvReader<F> {
    lookup: F,
    missing: std::cell::RefCell<Vec<String>>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: std::cell::RefCell::new(Vec::new()),
        }
    }

    /// Blank values count as unset
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Option<String> {
        let value = self.optional(key);
        if value.is_none() {
            self.missing.borrow_mut().push(key.to_string());
        }
        value
    }

    /// First present key of a list of aliases
    fn required_any(&self, keys: &[&'static str]) -> Option<(&'static str, String)> {
        let found = keys
            .iter()
            .find_map(|key| self.optional(key).map(|value| (*key, value)));
        if found.is_none() {
            self.missing.borrow_mut().push(keys.join("|"));
        }
        found
    }

    fn take_missing(&self) -> Vec<String> {
        std::mem::take(&mut *self.missing.borrow_mut())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn parse_positive_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => parse_positive(key, &raw),
            None => Ok(default),
        }
    }

    fn parse_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &raw, "expected true/false")),
            },
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value: T = parse_value(key, raw)?;
    if value <= T::default() {
        return Err(invalid(key, raw, "must be greater than zero"));
    }
    Ok(value)
}

/// Split ENDPOINT_URL into host and port
///
/// Accepts a bare host name or an `mqtts://host[:port]` URL.
fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    if endpoint.contains("://") {
        let url =
            Url::parse(endpoint).map_err(|_| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
        if !matches!(url.scheme(), "mqtts" | "ssl" | "tls") {
            return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
        return Ok((host.to_string(), url.port().unwrap_or(default_port)));
    }

    let is_hostname = endpoint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !is_hostname {
        return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok((endpoint.to_string(), default_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("CLIENT", "door-01"),
            ("ENDPOINT_URL", "abc123-ats.iot.ap-northeast-1.amazonaws.com"),
            ("AWS_ROOT_CA_PATH", "/etc/door/AmazonRootCA1.pem"),
            ("AWS_PRIVATE_KEY_PATH", "/etc/door/private.pem.key"),
            ("AWS_CERTIFICATE_PATH", "/etc/door/certificate.pem.crt"),
            ("SENSOR_TOPIC", "door/sensor"),
            ("PUBLISH_INTERVAL", "300"),
            ("GPIO_PIN", "17"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<AgentConfig, ConfigError> {
        AgentConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.device.client_id, "door-01");
        assert_eq!(config.device.gpio_pin, 17);
        assert!(!config.device.gpio_active_low);
        assert_eq!(config.broker.port, DEFAULT_PORT);
        assert_eq!(config.topics.heartbeat, "door/sensor");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(300));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(5));
        assert_eq!(config.inactivity_threshold(), None);
        assert_eq!(config.schedule.edge_trigger, EdgeTrigger::Rising);
        assert_eq!(config.drain_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_all_missing_keys_are_reported() {
        let mut env = base_env();
        env.remove("CLIENT");
        env.remove("GPIO_PIN");
        env.remove("PUBLISH_INTERVAL");

        match load(&env) {
            Err(ConfigError::MissingKeys(keys)) => {
                assert_eq!(keys, vec!["CLIENT", "PUBLISH_INTERVAL|INTERVAL", "GPIO_PIN"]);
            }
            other => panic!("expected MissingKeys, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("SENSOR_TOPIC", "   ");
        assert!(matches!(load(&env), Err(ConfigError::MissingKeys(_))));
    }

    #[test]
    fn test_interval_alias() {
        let mut env = base_env();
        env.remove("PUBLISH_INTERVAL");
        env.insert("INTERVAL", "60");
        let config = load(&env).unwrap();
        assert_eq!(config.schedule.heartbeat_interval_secs, 60);
    }

    #[test]
    fn test_type_coercion_failure() {
        let mut env = base_env();
        env.insert("GPIO_PIN", "seventeen");
        match load(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "GPIO_PIN"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut env = base_env();
        env.insert("POLL_INTERVAL", "0");
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_optional_overrides() {
        let mut env = base_env();
        env.insert("HEARTBEAT_TOPIC", "door/heartbeat");
        env.insert("INACTIVITY_THRESHOLD_HOURS", "24");
        env.insert("EDGE_TRIGGER", "both");
        env.insert("GPIO_ACTIVE_LOW", "true");
        env.insert("TIMEZONE_OFFSET_HOURS", "9");
        env.insert("RECONNECTION_INTERVAL", "15");

        let config = load(&env).unwrap();
        assert_eq!(config.topics.heartbeat, "door/heartbeat");
        assert_eq!(
            config.inactivity_threshold(),
            Some(Duration::from_secs(24 * 3600))
        );
        assert_eq!(config.schedule.edge_trigger, EdgeTrigger::Both);
        assert!(config.device.gpio_active_low);
        assert_eq!(config.device.timezone_offset_hours, 9);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let mut env = base_env();
        env.insert("HEARTBEAT_TOPIC", "door/#");
        match load(&env) {
            Err(ConfigError::InvalidTopic { key, .. }) => assert_eq!(key, "HEARTBEAT_TOPIC"),
            other => panic!("expected InvalidTopic, got {other:?}"),
        }
    }

    #[test]
    fn test_timezone_range() {
        let mut env = base_env();
        env.insert("TIMEZONE_OFFSET_HOURS", "24");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_endpoint_forms() {
        assert_eq!(
            parse_endpoint("broker.example.com", 443).unwrap(),
            ("broker.example.com".to_string(), 443)
        );
        assert_eq!(
            parse_endpoint("mqtts://broker.example.com:8883", 443).unwrap(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(
            parse_endpoint("mqtts://broker.example.com", 443).unwrap(),
            ("broker.example.com".to_string(), 443)
        );
        assert!(parse_endpoint("mqtt://plaintext.example.com", 443).is_err());
        assert!(parse_endpoint("not a host", 443).is_err());
    }

    #[test]
    fn test_unknown_edge_trigger() {
        let mut env = base_env();
        env.insert("EDGE_TRIGGER", "sideways");
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let config = load(&base_env()).unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("client_id = \"door-01\""));
        assert!(rendered.contains("edge_trigger = \"rising\""));
    }
}
