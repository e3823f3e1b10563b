//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading: defaults, aliases,
//! error reporting and env file merging.

mod test_helpers;

use door_sensor_agent::agent::{EdgeTrigger, RunnerSettings};
use door_sensor_agent::config::{load_env_file, AgentConfig, ConfigError};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn load(env: &HashMap<String, String>) -> Result<AgentConfig, ConfigError> {
    AgentConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn test_config_loads_with_defaults() {
    let config = load(&test_helpers::base_env()).unwrap();

    assert_eq!(config.device.client_id, "door-01");
    assert_eq!(config.broker.host, "abc123-ats.iot.ap-northeast-1.amazonaws.com");
    assert_eq!(config.broker.port, 443);
    assert_eq!(config.broker.offline_queue_depth, 1000);
    assert_eq!(config.broker.draining_frequency, 2);
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.operation_timeout(), Duration::from_secs(5));
    assert_eq!(config.topics.heartbeat, config.topics.sensor);
}

#[test]
fn test_empty_environment_reports_every_required_key() {
    let result = load(&HashMap::new());

    match result {
        Err(ConfigError::MissingKeys(keys)) => {
            assert_eq!(keys.len(), 8);
            assert!(keys.contains(&"CLIENT".to_string()));
            assert!(keys.contains(&"AWS_CERTIFICATE_PATH".to_string()));
            assert!(keys.contains(&"PUBLISH_INTERVAL|INTERVAL".to_string()));
        }
        other => panic!("expected MissingKeys, got {other:?}"),
    }
}

#[test]
fn test_runner_settings_follow_config() {
    let mut env = test_helpers::base_env();
    env.insert("HEARTBEAT_TOPIC".into(), "door/heartbeat".into());
    env.insert("POLL_INTERVAL".into(), "2".into());
    env.insert("RECONNECTION_INTERVAL".into(), "30".into());
    env.insert("INACTIVITY_THRESHOLD_HOURS".into(), "12".into());
    env.insert("EDGE_TRIGGER".into(), "falling".into());
    env.insert("TIMEZONE_OFFSET_HOURS".into(), "9".into());

    let config = load(&env).unwrap();
    let settings = RunnerSettings::from_config(&config);

    assert_eq!(settings.detector.topic, "door/sensor");
    assert_eq!(settings.detector.poll_interval, Duration::from_secs(2));
    assert_eq!(settings.detector.trigger, EdgeTrigger::Falling);
    assert_eq!(
        settings.detector.inactivity_threshold,
        Some(Duration::from_secs(12 * 3600))
    );
    assert_eq!(settings.heartbeat_topic, "door/heartbeat");
    assert_eq!(settings.heartbeat_period, Duration::from_secs(300));
    assert_eq!(settings.reconnect.delay_for(1), Duration::from_secs(30));
    assert_eq!(settings.clock.offset().local_minus_utc(), 9 * 3600);
}

#[test]
fn test_endpoint_url_with_port() {
    let mut env = test_helpers::base_env();
    env.insert("ENDPOINT_URL".into(), "mqtts://broker.local:8883".into());

    let config = load(&env).unwrap();
    assert_eq!(config.broker.host, "broker.local");
    assert_eq!(config.broker.port, 8883);
}

#[test]
fn test_invalid_port_is_rejected() {
    let mut env = test_helpers::base_env();
    env.insert("ENDPOINT_PORT".into(), "70000".into());

    match load(&env) {
        Err(ConfigError::InvalidValue { key, value, .. }) => {
            assert_eq!(key, "ENDPOINT_PORT");
            assert_eq!(value, "70000");
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn test_env_file_is_merged_without_overriding() {
    std::env::set_var("DOOR_SENSOR_TEST_PRESET", "from-process");

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "DOOR_SENSOR_TEST_FROM_FILE=from-file").unwrap();
    writeln!(file, "DOOR_SENSOR_TEST_PRESET=from-file").unwrap();
    file.flush().unwrap();

    let loaded = load_env_file(Some(file.path())).unwrap();
    assert_eq!(loaded.as_deref(), Some(file.path()));

    assert_eq!(
        std::env::var("DOOR_SENSOR_TEST_FROM_FILE").unwrap(),
        "from-file"
    );
    assert_eq!(
        std::env::var("DOOR_SENSOR_TEST_PRESET").unwrap(),
        "from-process"
    );
}

#[test]
fn test_missing_env_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.env");

    assert!(matches!(
        load_env_file(Some(&missing)),
        Err(ConfigError::EnvFile { .. })
    ));
}
