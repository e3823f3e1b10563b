//! Impure I/O operations for the MQTT adapter
//!
//! One rumqttc client and event loop live for the whole process, so the
//! offline request queue and QoS 1 session state survive reconnects. After a
//! successful `connect` a driver task owns the event loop and reports link
//! health and per-packet acknowledgements back to waiting publishers.

use super::ack_tracker::AckTracker;
use super::connection::{configure_mqtt_options, BrokerSettings, LinkState, TlsMaterial};
use super::event_handler::{EventHandler, EventRoute};
use crate::config::AgentConfig;
use crate::transport::{BrokerClient, BrokerError, QoS};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Time the driver gets to wind down before it is aborted
const DRIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct DriverHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Acknowledgement state shared between publishers and the driver task
struct SharedAcks {
    tracker: std::sync::Mutex<AckTracker>,
    changed: watch::Sender<u64>,
}

impl SharedAcks {
    fn new() -> Self {
        let (changed, _) = watch::channel(0u64);
        Self {
            tracker: std::sync::Mutex::new(AckTracker::new()),
            changed,
        }
    }

    fn update<R>(&self, apply: impl FnOnce(&mut AckTracker) -> R) -> R {
        let result = {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            apply(&mut tracker)
        };
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
        result
    }

    fn take_result(&self) -> Option<Result<(), String>> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_result()
    }

    /// Feed publish traffic from the event loop into the tracker
    fn record(&self, route: &EventRoute) {
        match route {
            EventRoute::PublishSent { pkid } => self.update(|t| t.on_sent(*pkid)),
            EventRoute::PublishAcknowledged { pkid } => {
                debug!(pkid, "Publish acknowledged");
                self.update(|t| t.on_ack(*pkid, Ok(())));
            }
            EventRoute::PublishRejected { pkid, reason } => {
                warn!(pkid, reason = %reason, "Broker rejected publish");
                self.update(|t| t.on_ack(*pkid, Err(reason.clone())));
            }
            _ => {}
        }
    }
}

/// Why a QoS 1 publish ended without a positive acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
enum AckFailure {
    Rejected(String),
    LinkLost(String),
}

/// TLS MQTT client for the door sensor agent
pub struct MqttBroker {
    settings: BrokerSettings,
    client: AsyncClient,
    event_loop: Arc<Mutex<EventLoop>>,
    link_tx: Arc<watch::Sender<LinkState>>,
    acks: Arc<SharedAcks>,
    publish_gate: Mutex<()>,
    driver: Mutex<Option<DriverHandle>>,
}

impl MqttBroker {
    /// Build the client from configuration
    ///
    /// Reads the TLS material immediately so unreadable credentials are a
    /// startup failure rather than an endless reconnect loop.
    pub fn new(config: &AgentConfig) -> Result<Self, BrokerError> {
        let settings = BrokerSettings::from_config(config);
        let tls = TlsMaterial::load(config)?;
        Ok(Self::with_settings(settings, tls))
    }

    pub fn with_settings(settings: BrokerSettings, tls: TlsMaterial) -> Self {
        let mqtt_options = configure_mqtt_options(&settings, tls);
        let (client, event_loop) = AsyncClient::new(mqtt_options, settings.offline_queue_depth);
        let (link_tx, _) = watch::channel(LinkState::Down("not connected yet".to_string()));

        Self {
            settings,
            client,
            event_loop: Arc::new(Mutex::new(event_loop)),
            link_tx: Arc::new(link_tx),
            acks: Arc::new(SharedAcks::new()),
            publish_gate: Mutex::new(()),
            driver: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Drive the event loop until ConnAck or failure
    async fn await_session(
        event_loop: &mut OwnedMutexGuard<EventLoop>,
        acks: &SharedAcks,
    ) -> Result<bool, BrokerError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
            let route = EventHandler::route_mqtt_event(&event);
            acks.record(&route);
            match route {
                EventRoute::SessionAccepted { session_present } => return Ok(session_present),
                EventRoute::SessionRefused(code) => {
                    return Err(BrokerError::ConnectionFailed(format!(
                        "broker refused session: {code}"
                    )))
                }
                EventRoute::Disconnected => {
                    return Err(BrokerError::ConnectionFailed(
                        "broker closed the connection during handshake".to_string(),
                    ))
                }
                _ => {}
            }
        }
    }

    /// Hand the event loop to a background task for the life of the link
    async fn spawn_driver(&self, mut event_loop: OwnedMutexGuard<EventLoop>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let link_tx = self.link_tx.clone();
        let acks = self.acks.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("MQTT driver stop requested");
                        break;
                    }
                    event = event_loop.poll() => match event {
                        Ok(event) => {
                            let route = EventHandler::route_mqtt_event(&event);
                            acks.record(&route);
                            match route {
                                EventRoute::Disconnected => {
                                    warn!("Broker closed the MQTT session");
                                    link_tx.send_replace(LinkState::Down(
                                        "broker sent disconnect".to_string(),
                                    ));
                                    break;
                                }
                                EventRoute::SessionRefused(code) => {
                                    warn!(code = %code, "Broker refused the MQTT session");
                                    link_tx.send_replace(LinkState::Down(code));
                                    break;
                                }
                                _ => {}
                            }
                        }
                        Err(e) => {
                            if let Some(reason) = EventHandler::publish_rejection(&e) {
                                warn!(reason = %reason, "Broker rejected publish");
                                acks.update(|t| t.on_rejected(reason));
                            }
                            warn!(error = %e, "MQTT link lost");
                            link_tx.send_replace(LinkState::Down(e.to_string()));
                            break;
                        }
                    }
                }
            }
            debug!("MQTT driver stopped");
        });

        *self.driver.lock().await = Some(DriverHandle { stop_tx, handle });
    }

    /// Stop the driver, aborting it if it does not stop in time
    async fn stop_driver(&self) {
        let driver = self.driver.lock().await.take();
        let Some(DriverHandle {
            stop_tx,
            mut handle,
        }) = driver
        else {
            return;
        };

        let _ = stop_tx.send(true);
        match tokio::time::timeout(DRIVER_SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("MQTT driver shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "MQTT driver ended with error"),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("MQTT driver did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    fn mark_down(&self, reason: &str) {
        self.link_tx.send_replace(LinkState::Down(reason.to_string()));
    }

    /// Wait for the broker's answer to the publish being tracked
    async fn await_ack(
        acks: &SharedAcks,
        mut changes: watch::Receiver<u64>,
        mut link: watch::Receiver<LinkState>,
    ) -> Result<(), AckFailure> {
        loop {
            if let Some(result) = acks.take_result() {
                return result.map_err(AckFailure::Rejected);
            }
            if let LinkState::Down(reason) = &*link.borrow_and_update() {
                return Err(AckFailure::LinkLost(reason.clone()));
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(AckFailure::LinkLost("acknowledgement channel closed".to_string()));
                    }
                }
                changed = link.changed() => {
                    if changed.is_err() {
                        return Err(AckFailure::LinkLost("link channel closed".to_string()));
                    }
                }
            }
        }
    }
}

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.is_connected() {
            return Ok(());
        }

        // A finished driver still holds the event loop until it is joined
        self.stop_driver().await;

        let mut event_loop = self.event_loop.clone().lock_owned().await;
        let timeout = self.settings.connect_timeout;
        debug!(endpoint = %self.settings.endpoint(), "Opening MQTT session");

        let handshake = Self::await_session(&mut event_loop, &self.acks).instrument(
            crate::mqtt_span!(operation = "connect", endpoint = %self.settings.endpoint()),
        );
        let session_present = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(BrokerError::ConnectTimeout(timeout)),
        };

        self.link_tx.send_replace(LinkState::Up);
        info!(
            endpoint = %self.settings.endpoint(),
            client_id = %self.settings.client_id,
            session_present,
            "MQTT session established"
        );
        self.spawn_driver(event_loop).await;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        // One publish in flight at a time so packet ids map to callers
        let _gate = self.publish_gate.lock().await;

        let mut changes = self.acks.changed.subscribe();
        changes.borrow_and_update();
        let link = self.link_tx.subscribe();
        if !link.borrow().is_up() {
            return Err(BrokerError::NotConnected);
        }

        let track = qos.requires_ack();
        if track {
            self.acks.update(|t| t.begin());
        }

        let timeout = self.settings.operation_timeout;
        let queued = tokio::time::timeout(
            timeout,
            self.client.publish(topic, to_mqtt_qos(qos), false, payload),
        )
        .await;
        let queue_error = match queued {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("request queue still full after {timeout:?}")),
        };
        if let Some(reason) = queue_error {
            if track {
                self.acks.update(|t| t.cancel());
            }
            return Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason,
            });
        }

        if !track {
            return Ok(());
        }

        match tokio::time::timeout(timeout, Self::await_ack(&self.acks, changes, link)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(AckFailure::Rejected(reason))) => Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: format!("broker rejected publish: {reason}"),
            }),
            Ok(Err(AckFailure::LinkLost(reason))) => {
                self.acks.update(|t| t.abandon());
                Err(BrokerError::LinkLost {
                    topic: topic.to_string(),
                    reason,
                })
            }
            Err(_) => {
                self.acks.update(|t| t.abandon());
                self.mark_down("publish acknowledgement timed out");
                self.stop_driver().await;
                Err(BrokerError::AckTimeout {
                    topic: topic.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn disconnect(&self) {
        if self.is_connected() {
            match tokio::time::timeout(self.settings.operation_timeout, self.client.disconnect())
                .await
            {
                Ok(Ok(())) => {
                    let mut link = self.link_tx.subscribe();
                    let _ = tokio::time::timeout(
                        DRIVER_SHUTDOWN_GRACE,
                        link.wait_for(|state| !state.is_up()),
                    )
                    .await;
                }
                Ok(Err(e)) => warn!(error = %e, "Failed to queue MQTT disconnect"),
                Err(_) => warn!("Timed out queueing MQTT disconnect"),
            }
        }

        self.stop_driver().await;
        self.mark_down("client disconnected");
        info!("MQTT client disconnected");
    }

    fn is_connected(&self) -> bool {
        self.link_tx.borrow().is_up()
    }
}
