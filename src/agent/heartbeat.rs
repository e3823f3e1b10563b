//! Periodic liveness messages
//!
//! Runs on its own cadence, independent of sensor activity. The first
//! heartbeat goes out as soon as the emitter starts.

use super::publisher::{EventPublisher, PublishOutcome};
use super::shutdown_requested;
use crate::protocol::{EventClock, EventKind};
use crate::transport::BrokerClient;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub struct HeartbeatEmitter<B: BrokerClient> {
    topic: String,
    period: Duration,
    publisher: EventPublisher<B>,
    clock: EventClock,
}

impl<B: BrokerClient> HeartbeatEmitter<B> {
    pub fn new(
        topic: impl Into<String>,
        period: Duration,
        publisher: EventPublisher<B>,
        clock: EventClock,
    ) -> Self {
        Self {
            topic: topic.into(),
            period,
            publisher,
            clock,
        }
    }

    /// Emit heartbeats until shutdown; returns how many ticks were handled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            topic = %self.topic,
            period_secs = self.period.as_secs(),
            "Heartbeat emitter started"
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    let event = self.clock.event(EventKind::Heartbeat);
                    if self.publisher.publish(&self.topic, &event).await
                        == PublishOutcome::ShutdownRequested
                    {
                        break;
                    }
                }
            }
        }

        info!(ticks, "Heartbeat emitter stopped");
        ticks
    }
}
