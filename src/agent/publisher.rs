//! Publish path shared by the edge detector and the heartbeat emitter
//!
//! A failed publish drops the message, logs enough context to diagnose it
//! later and hands control to the connection supervisor before the caller
//! resumes its schedule.

use super::supervisor::{ConnectOutcome, ConnectionSupervisor};
use crate::protocol::DeviceEvent;
use crate::transport::{BrokerClient, QoS};
use std::sync::Arc;
use tracing::{error, info};

/// Longest payload excerpt written to failure logs
const PAYLOAD_SUMMARY_LEN: usize = 160;

/// What happened to one publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// Message lost; the connection has been re-established
    Dropped,
    /// Message lost and shutdown arrived while reconnecting
    ShutdownRequested,
}

pub struct EventPublisher<B: BrokerClient> {
    broker: Arc<B>,
    supervisor: Arc<ConnectionSupervisor<B>>,
}

impl<B: BrokerClient> Clone for EventPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            supervisor: self.supervisor.clone(),
        }
    }
}

impl<B: BrokerClient> EventPublisher<B> {
    pub fn new(supervisor: Arc<ConnectionSupervisor<B>>) -> Self {
        Self {
            broker: supervisor.broker().clone(),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor<B>> {
        &self.supervisor
    }

    /// Publish one event at QoS 1, reconnecting on failure
    pub async fn publish(&self, topic: &str, event: &DeviceEvent) -> PublishOutcome {
        let kind = event.kind.label();
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(operation = "serialize", topic, kind, error = %e, "Failed to encode event");
                return PublishOutcome::Dropped;
            }
        };
        let summary = summarize(&payload);

        match self.broker.publish(topic, payload, QoS::AtLeastOnce).await {
            Ok(()) => {
                info!(topic, kind, payload = %summary, "Published event");
                PublishOutcome::Delivered
            }
            Err(e) => {
                error!(
                    operation = "publish",
                    topic,
                    kind,
                    payload = %summary,
                    error = %e,
                    "Publish failed, attempting reconnect"
                );
                match self.supervisor.ensure_connected().await {
                    ConnectOutcome::Connected => PublishOutcome::Dropped,
                    ConnectOutcome::ShutdownRequested => PublishOutcome::ShutdownRequested,
                }
            }
        }
    }
}

fn summarize(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= PAYLOAD_SUMMARY_LEN {
        return text.into_owned();
    }
    let mut summary: String = text.chars().take(PAYLOAD_SUMMARY_LEN).collect();
    summary.push_str("...");
    summary
}
