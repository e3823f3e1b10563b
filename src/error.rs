//! Top-level error taxonomy for the door sensor agent
//!
//! Configuration and hardware errors are fatal and only occur before the
//! loops start. Broker errors raised while running are recovered by the
//! connection supervisor and never reach this type; the ones that do
//! (unreadable credentials, bad endpoint) come from building the client.

use crate::config::ConfigError;
use crate::sensor::SensorError;
use crate::transport::BrokerError;
use thiserror::Error;

/// Main error type for agent startup and shutdown
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Hardware initialization failed: {0}")]
    HardwareInit(#[from] SensorError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Failed to set up logging: {0}")]
    Logging(#[source] std::io::Error),

    #[error("Agent task failed: {message}")]
    TaskFailed { message: String },
}

impl AgentError {
    /// Whether the error must stop the process
    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::Configuration(_)
            | AgentError::HardwareInit(_)
            | AgentError::Logging(_)
            | AgentError::TaskFailed { .. } => true,
            AgentError::Broker(e) => e.is_fatal(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        let config: AgentError = ConfigError::MissingKeys(vec!["CLIENT".into()]).into();
        assert!(config.is_fatal());
        assert!(config.to_string().contains("CLIENT"));

        let hardware: AgentError = SensorError::NotReady {
            pin: 17,
            waited_ms: 500,
        }
        .into();
        assert!(hardware.is_fatal());
    }

    #[test]
    fn test_runtime_broker_errors_are_recoverable() {
        let error: AgentError = BrokerError::NotConnected.into();
        assert!(!error.is_fatal());

        let error: AgentError = BrokerError::InvalidEndpoint("x".into()).into();
        assert!(error.is_fatal());
    }
}
