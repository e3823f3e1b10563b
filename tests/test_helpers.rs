//! Test helpers and utilities for integration tests

use door_sensor_agent::agent::{
    ConnectionSupervisor, EdgeDetectorSettings, EdgeTrigger, EventPublisher, ReconnectPolicy,
    RunnerSettings,
};
use door_sensor_agent::protocol::EventClock;
use door_sensor_agent::testing::MockBroker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const SENSOR_TOPIC: &str = "door/sensor";
pub const HEARTBEAT_TOPIC: &str = "door/heartbeat";

/// Required keys of a minimal valid environment
#[allow(dead_code)]
pub fn base_env() -> HashMap<String, String> {
    [
        ("CLIENT", "door-01"),
        ("ENDPOINT_URL", "abc123-ats.iot.ap-northeast-1.amazonaws.com"),
        ("AWS_ROOT_CA_PATH", "/etc/door/AmazonRootCA1.pem"),
        ("AWS_PRIVATE_KEY_PATH", "/etc/door/private.pem.key"),
        ("AWS_CERTIFICATE_PATH", "/etc/door/certificate.pem.crt"),
        ("SENSOR_TOPIC", SENSOR_TOPIC),
        ("PUBLISH_INTERVAL", "300"),
        ("GPIO_PIN", "17"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[allow(dead_code)]
pub fn detector_settings(poll: Duration, inactivity: Option<Duration>) -> EdgeDetectorSettings {
    EdgeDetectorSettings {
        topic: SENSOR_TOPIC.to_string(),
        poll_interval: poll,
        trigger: EdgeTrigger::Rising,
        inactivity_threshold: inactivity,
    }
}

#[allow(dead_code)]
pub fn runner_settings(poll: Duration, heartbeat: Duration) -> RunnerSettings {
    RunnerSettings {
        detector: detector_settings(poll, None),
        heartbeat_topic: HEARTBEAT_TOPIC.to_string(),
        heartbeat_period: heartbeat,
        reconnect: ReconnectPolicy::fixed(Duration::from_secs(5)),
        clock: EventClock::from_offset_hours(9),
    }
}

/// Publisher over a mock broker plus the shutdown sender that controls it
#[allow(dead_code)]
pub fn mock_publisher(
    broker: Arc<MockBroker>,
    backoff: Duration,
) -> (EventPublisher<MockBroker>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        broker,
        ReconnectPolicy::fixed(backoff),
        shutdown_rx,
    ));
    (EventPublisher::new(supervisor), shutdown_tx)
}
