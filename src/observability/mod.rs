//! Observability for the door sensor agent
//!
//! Structured logging only; the agent runs unattended and its log sink is
//! the single place failures are recorded.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
