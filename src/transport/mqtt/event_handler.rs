//! Pure routing of rumqttc event-loop output
//!
//! The agent only publishes, so the interesting traffic is the session
//! acknowledgement, outgoing publishes with their acknowledgements, and
//! disconnects.

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, PubAckReason};
use rumqttc::v5::{ConnectionError, Event, StateError};
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session
    SessionAccepted { session_present: bool },
    /// Broker refused the session
    SessionRefused(String),
    /// Publish written to the network under this packet id
    PublishSent { pkid: u16 },
    /// QoS 1 publish acknowledged
    PublishAcknowledged { pkid: u16 },
    /// QoS 1 publish refused by the broker
    PublishRejected { pkid: u16, reason: String },
    /// Broker closed the session
    Disconnected,
    /// Pings and other bookkeeping traffic
    Other,
}

pub struct EventHandler;

impl EventHandler {
    /// Route MQTT event to the matching link update
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::SessionAccepted {
                        session_present: connack.session_present,
                    },
                    code => EventRoute::SessionRefused(format!("{code:?}")),
                },
                Packet::PubAck(puback) => match puback.reason {
                    PubAckReason::Success | PubAckReason::NoMatchingSubscribers => {
                        EventRoute::PublishAcknowledged { pkid: puback.pkid }
                    }
                    reason => EventRoute::PublishRejected {
                        pkid: puback.pkid,
                        reason: format!("{reason:?}"),
                    },
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                _ => EventRoute::Other,
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(_) => EventRoute::Other,
        }
    }

    /// Reason code of a publish refusal reported as an event-loop error
    ///
    /// The event loop checks PubAck reason codes itself and fails `poll`
    /// instead of yielding the packet.
    pub fn publish_rejection(error: &ConnectionError) -> Option<String> {
        match error {
            ConnectionError::MqttState(StateError::PubAckFail { reason }) => {
                Some(format!("{reason:?}"))
            }
            _ => None,
        }
    }
}
