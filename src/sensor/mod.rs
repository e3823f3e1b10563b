//! Sensor port for the door reed switch
//!
//! The core only ever asks a [`SensorReader`] for the current level. Hardware
//! adapters own their setup and teardown so the runner can release them on
//! every exit path.

use std::path::PathBuf;
use thiserror::Error;

pub mod sysfs;

pub use sysfs::SysfsGpioSensor;

/// Sampled level of a binary input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorLevel {
    Low,
    High,
}

impl SensorLevel {
    /// Level as the 0/1 value exposed by GPIO drivers
    pub fn as_bit(self) -> u8 {
        match self {
            SensorLevel::Low => 0,
            SensorLevel::High => 1,
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            SensorLevel::Low => SensorLevel::High,
            SensorLevel::High => SensorLevel::Low,
        }
    }
}

impl From<bool> for SensorLevel {
    fn from(high: bool) -> Self {
        if high {
            SensorLevel::High
        } else {
            SensorLevel::Low
        }
    }
}

/// Hardware access errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("GPIO I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unexpected GPIO value {value:?} read from {path}")]
    InvalidValue { path: PathBuf, value: String },
    #[error("GPIO line {pin} did not become available within {waited_ms}ms")]
    NotReady { pin: u32, waited_ms: u64 },
    #[error("GPIO setup task failed: {0}")]
    SetupTask(String),
}

/// Read-side port for the physical input
///
/// Implementations are moved into the edge detector task, so they must be
/// `Send`. `release` must be idempotent; the runner calls it once the
/// sampling loop has stopped, and adapters are free to call it again from
/// `Drop`.
pub trait SensorReader: Send + 'static {
    /// Read the current level
    fn read(&mut self) -> Result<SensorLevel, SensorError>;

    /// Give the hardware back to the system
    fn release(&mut self) {}
}
