//! Broker transport boundary
//!
//! The publishing engine talks to the broker only through [`BrokerClient`].
//! The MQTT implementation lives in [`mqtt`]; tests use
//! [`crate::testing::MockBroker`].

use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Delivery level for a single publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

impl QoS {
    pub fn requires_ack(self) -> bool {
        matches!(self, QoS::AtLeastOnce)
    }
}

/// Broker operation failures
///
/// Connection-class errors are recovered by the connection supervisor;
/// publish-class errors drop the message and trigger a reconnect.
/// `Credentials` and `InvalidEndpoint` only occur while building the client
/// and are fatal.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Publish to {topic} was not acknowledged within {timeout:?}")]
    AckTimeout { topic: String, timeout: Duration },
    #[error("Connection lost while waiting for acknowledgement on {topic}: {reason}")]
    LinkLost { topic: String, reason: String },
    #[error("Failed to read credential file {path}: {source}")]
    Credentials {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
}

impl BrokerError {
    /// Failure of `connect()`
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_) | BrokerError::ConnectTimeout(_)
        )
    }

    /// Failure of `publish()`
    pub fn is_publish_error(&self) -> bool {
        matches!(
            self,
            BrokerError::NotConnected
                | BrokerError::PublishFailed { .. }
                | BrokerError::AckTimeout { .. }
                | BrokerError::LinkLost { .. }
        )
    }

    /// Errors that can only be fixed by changing configuration
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::Credentials { .. } | BrokerError::InvalidEndpoint(_)
        )
    }
}

/// Publish channel to the remote broker
///
/// All methods take `&self`: one client is shared by the edge detector, the
/// heartbeat emitter and the connection supervisor.
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Establish a session; fails within a bounded timeout
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publish one message; QoS 1 waits for the broker acknowledgement
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), BrokerError>;

    /// Best-effort session teardown
    async fn disconnect(&self);

    /// Whether the session is currently believed to be up
    fn is_connected(&self) -> bool;
}
