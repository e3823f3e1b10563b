//! Agent lifecycle: connect, run both loops, shut down in order
//!
//! The runner owns the shutdown channel. Both loops are spawned as tasks
//! and always joined; the broker is disconnected and the sensor released on
//! every exit path after the initial connect.

use super::edge_detector::{EdgeDetector, EdgeDetectorSettings};
use super::heartbeat::HeartbeatEmitter;
use super::publisher::EventPublisher;
use super::supervisor::{ConnectOutcome, ConnectionSupervisor, ReconnectPolicy};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::protocol::EventClock;
use crate::sensor::SensorReader;
use crate::transport::BrokerClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Everything the runner needs besides the broker and the sensor
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub detector: EdgeDetectorSettings,
    pub heartbeat_topic: String,
    pub heartbeat_period: Duration,
    pub reconnect: ReconnectPolicy,
    pub clock: EventClock,
}

impl RunnerSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            detector: EdgeDetectorSettings {
                topic: config.topics.sensor.clone(),
                poll_interval: config.poll_interval(),
                trigger: config.schedule.edge_trigger,
                inactivity_threshold: config.inactivity_threshold(),
            },
            heartbeat_topic: config.topics.heartbeat.clone(),
            heartbeat_period: config.heartbeat_interval(),
            reconnect: ReconnectPolicy::fixed(config.reconnect_interval()),
            clock: EventClock::from_offset_hours(config.device.timezone_offset_hours),
        }
    }
}

/// Counters reported after a clean stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub heartbeat_ticks: u64,
    pub connect_attempts: u64,
}

pub struct Runner<B: BrokerClient, S: SensorReader> {
    broker: Arc<B>,
    sensor: S,
    settings: RunnerSettings,
}

impl<B: BrokerClient, S: SensorReader> Runner<B, S> {
    pub fn new(broker: Arc<B>, sensor: S, settings: RunnerSettings) -> Self {
        Self {
            broker,
            sensor,
            settings,
        }
    }

    /// Run until `shutdown_signal` resolves
    pub async fn run<F>(self, shutdown_signal: F) -> Result<RunSummary, AgentError>
    where
        F: Future<Output = ()>,
    {
        let Runner {
            broker,
            mut sensor,
            settings,
        } = self;
        tokio::pin!(shutdown_signal);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            broker.clone(),
            settings.reconnect.clone(),
            shutdown_rx.clone(),
        ));
        let publisher = EventPublisher::new(supervisor.clone());

        info!(
            sensor_topic = %settings.detector.topic,
            heartbeat_topic = %settings.heartbeat_topic,
            "agent starting"
        );

        let outcome = tokio::select! {
            outcome = supervisor.ensure_connected() => outcome,
            _ = &mut shutdown_signal => {
                info!("manual stop detected");
                let _ = shutdown_tx.send(true);
                ConnectOutcome::ShutdownRequested
            }
        };
        if outcome == ConnectOutcome::ShutdownRequested {
            broker.disconnect().await;
            sensor.release();
            info!("agent terminated");
            return Ok(RunSummary {
                heartbeat_ticks: 0,
                connect_attempts: supervisor.attempts(),
            });
        }

        let baseline = match sensor.read() {
            Ok(level) => level,
            Err(e) => {
                error!(error = %e, "Failed to read sensor baseline");
                broker.disconnect().await;
                sensor.release();
                return Err(AgentError::HardwareInit(e));
            }
        };

        let detector = EdgeDetector::new(
            sensor,
            baseline,
            settings.detector.clone(),
            publisher.clone(),
            settings.clock,
        );
        let heartbeat = HeartbeatEmitter::new(
            settings.heartbeat_topic.clone(),
            settings.heartbeat_period,
            publisher,
            settings.clock,
        );

        let mut detector_task = tokio::spawn(detector.run(shutdown_rx.clone()));
        let mut heartbeat_task = tokio::spawn(heartbeat.run(shutdown_rx));

        let mut detector_result = None;
        let mut heartbeat_result = None;
        tokio::select! {
            _ = &mut shutdown_signal => info!("manual stop detected"),
            result = &mut detector_task => {
                warn!("Edge detector ended before shutdown");
                detector_result = Some(result);
            }
            result = &mut heartbeat_task => {
                warn!("Heartbeat emitter ended before shutdown");
                heartbeat_result = Some(result);
            }
        }

        let _ = shutdown_tx.send(true);
        let detector_result = match detector_result {
            Some(result) => result,
            None => detector_task.await,
        };
        let heartbeat_result = match heartbeat_result {
            Some(result) => result,
            None => heartbeat_task.await,
        };

        let mut failure = None;
        match detector_result {
            Ok(mut sensor) => sensor.release(),
            Err(e) => failure = Some(task_failure("edge detector", e)),
        }
        let heartbeat_ticks = match heartbeat_result {
            Ok(ticks) => ticks,
            Err(e) => {
                failure.get_or_insert(task_failure("heartbeat emitter", e));
                0
            }
        };

        broker.disconnect().await;
        info!("agent terminated");

        match failure {
            Some(e) => Err(e),
            None => Ok(RunSummary {
                heartbeat_ticks,
                connect_attempts: supervisor.attempts(),
            }),
        }
    }
}

fn task_failure(task: &str, e: JoinError) -> AgentError {
    error!(task, error = %e, "Agent task failed");
    AgentError::TaskFailed {
        message: format!("{task}: {e}"),
    }
}
