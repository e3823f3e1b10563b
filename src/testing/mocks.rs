//! Mock implementations for testing
//!
//! [`MockBroker`] records every publish and can be told to fail a number of
//! upcoming connects or publishes. [`ScriptedSensor`] replays a fixed
//! sequence of levels.

use crate::sensor::{SensorError, SensorLevel, SensorReader};
use crate::transport::{BrokerClient, BrokerError, QoS};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Topic and decoded JSON payload of a delivered publish
pub type PublishedMessage = (String, Value);

/// Consume one unit of a failure budget; `u32::MAX` never runs out
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

/// Mock broker for testing
#[derive(Debug, Default)]
pub struct MockBroker {
    connected: AtomicBool,
    connect_calls: AtomicU32,
    publish_attempts: AtomicU32,
    disconnect_calls: AtomicU32,
    connect_failures: AtomicU32,
    publish_failures: AtomicU32,
    connect_delay: Mutex<Duration>,
    published: Mutex<Vec<PublishedMessage>>,
    delivered_at: Mutex<Vec<Instant>>,
}

impl MockBroker {
    /// Disconnected broker whose connects succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that starts with an established session
    pub fn connected() -> Self {
        let broker = Self::default();
        broker.connected.store(true, Ordering::SeqCst);
        broker
    }

    /// Make every `connect()` take this long (virtual time in paused tests)
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.connect_delay) = delay;
        self
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Upcoming publishes fail and take the link down with them
    pub fn fail_next_publishes(&self, count: u32) {
        self.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the session
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Payloads delivered on one topic, oldest first
    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        lock(&self.published)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Clock readings of the deliveries on one topic, oldest first
    pub fn delivery_times(&self, topic: &str) -> Vec<Instant> {
        let published = lock(&self.published);
        let delivered_at = lock(&self.delivered_at);
        published
            .iter()
            .zip(delivered_at.iter())
            .filter(|((t, _), _)| t == topic)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Payloads of one `kind`, across all topics
    pub fn published_kind(&self, kind: &str) -> Vec<Value> {
        lock(&self.published)
            .iter()
            .filter(|(_, payload)| payload["kind"] == kind)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_failure(&self.connect_failures) {
            return Err(BrokerError::ConnectionFailed(
                "mock broker refused connection".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), BrokerError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        if take_failure(&self.publish_failures) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(BrokerError::AckTimeout {
                topic: topic.to_string(),
                timeout: Duration::from_secs(5),
            });
        }

        let value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        let mut published = lock(&self.published);
        published.push((topic.to_string(), value));
        lock(&self.delivered_at).push(Instant::now());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sensor that replays a script of readings
///
/// `None` entries are read failures. Once the script is exhausted the last
/// successful level repeats; a sensor that never produced a level keeps
/// failing.
#[derive(Debug)]
pub struct ScriptedSensor {
    script: VecDeque<Option<SensorLevel>>,
    last: Option<SensorLevel>,
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl ScriptedSensor {
    pub fn new(levels: Vec<SensorLevel>) -> Self {
        Self::from_steps(levels.into_iter().map(Some).collect())
    }

    pub fn from_steps(steps: Vec<Option<SensorLevel>>) -> Self {
        Self {
            script: steps.into(),
            last: None,
            reads: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sensor whose every read fails
    pub fn failing() -> Self {
        Self::from_steps(Vec::new())
    }

    pub fn reads_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    fn read_error() -> SensorError {
        SensorError::Io {
            path: PathBuf::from("scripted"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "scripted read failure"),
        }
    }
}

impl SensorReader for ScriptedSensor {
    fn read(&mut self) -> Result<SensorLevel, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(Some(level)) => {
                self.last = Some(level);
                Ok(level)
            }
            Some(None) => Err(Self::read_error()),
            None => self.last.ok_or_else(Self::read_error),
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
