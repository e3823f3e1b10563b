//! MQTT over TLS implementation of [`BrokerClient`](crate::transport::BrokerClient)
//!
//! - [`connection`] - pure option building and credential loading
//! - [`event_handler`] - pure routing of event-loop output
//! - [`ack_tracker`] - matching acknowledgements to publishes by packet id
//! - [`client`] - the rumqttc-backed client and its driver task

pub mod ack_tracker;
pub mod client;
pub mod connection;
pub mod event_handler;

pub use ack_tracker::AckTracker;
pub use client::MqttBroker;
pub use connection::{configure_mqtt_options, BrokerSettings, LinkState, TlsMaterial};
pub use event_handler::{EventHandler, EventRoute};
