//! Door sensor agent
//!
//! Watches a door reed switch and publishes state transitions and liveness
//! heartbeats to an MQTT broker over a persistent mutual-TLS session.
//!
//! # Overview
//!
//! - [`sensor`] reads the switch through a [`sensor::SensorReader`] port
//! - [`transport`] talks to the broker through a [`transport::BrokerClient`] port
//! - [`agent`] holds the publishing engine: connection supervision, the edge
//!   detector and heartbeat loops, and the runner that owns shutdown
//! - [`protocol`] defines the JSON payloads and topic rules
//!
//! # Quick Start
//!
//! ```rust
//! use door_sensor_agent::protocol::{EventClock, EventKind};
//!
//! let clock = EventClock::from_offset_hours(9);
//! let event = clock.event(EventKind::Heartbeat);
//! let payload = String::from_utf8(event.to_payload().unwrap()).unwrap();
//! assert!(payload.contains(r#""kind":"heartbeat""#));
//! assert!(payload.contains("+09:00"));
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use agent::{Runner, RunnerSettings};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use transport::mqtt::MqttBroker;
