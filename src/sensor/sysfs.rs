//! Linux sysfs GPIO adapter
//!
//! Uses the `/sys/class/gpio` interface: export the line, configure it as
//! an input and read `value`. The line is unexported again on release if
//! this adapter was the one that exported it.
//!
//! sysfs has no control over pull resistors. The reed switch input needs an
//! external pull-up resistor or one enabled in the device tree, otherwise a
//! closed door leaves the line floating and it reads as random opens.

use super::{SensorError, SensorLevel, SensorReader};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// udev may take a moment to fix permissions on a freshly exported line
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const EXPORT_WAIT_ATTEMPTS: u32 = 25;

/// Reed switch input read through sysfs
#[derive(Debug)]
pub struct SysfsGpioSensor {
    root: PathBuf,
    pin: u32,
    active_low: bool,
    exported_by_us: bool,
    released: bool,
}

impl SysfsGpioSensor {
    /// Open `pin` under the default sysfs root
    ///
    /// Setup sleeps while udev settles a freshly exported line, so async
    /// callers go through [`SysfsGpioSensor::open_blocking_task`].
    pub fn open(pin: u32, active_low: bool) -> Result<Self, SensorError> {
        Self::open_at(SYSFS_GPIO_ROOT, pin, active_low)
    }

    /// Run [`SysfsGpioSensor::open_at`] on the blocking thread pool
    pub async fn open_blocking_task(
        root: impl Into<PathBuf>,
        pin: u32,
        active_low: bool,
    ) -> Result<Self, SensorError> {
        let root = root.into();
        tokio::task::spawn_blocking(move || Self::open_at(root, pin, active_low))
            .await
            .map_err(|e| SensorError::SetupTask(e.to_string()))?
    }

    /// Open `pin` under an explicit sysfs root
    pub fn open_at(
        root: impl Into<PathBuf>,
        pin: u32,
        active_low: bool,
    ) -> Result<Self, SensorError> {
        let root = root.into();
        let mut sensor = Self {
            root,
            pin,
            active_low,
            exported_by_us: false,
            released: false,
        };

        if !sensor.line_dir().exists() {
            write_attr(&sensor.root.join("export"), &pin.to_string())?;
            sensor.exported_by_us = true;
            sensor.wait_for_line()?;
            debug!(pin, "Exported GPIO line");
        }

        write_attr(&sensor.line_dir().join("direction"), "in")?;
        info!(pin, active_low, "GPIO input configured");
        Ok(sensor)
    }

    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn wait_for_line(&self) -> Result<(), SensorError> {
        let direction = self.line_dir().join("direction");
        for _ in 0..EXPORT_WAIT_ATTEMPTS {
            if direction.exists() {
                return Ok(());
            }
            std::thread::sleep(EXPORT_POLL_INTERVAL);
        }
        Err(SensorError::NotReady {
            pin: self.pin,
            waited_ms: EXPORT_POLL_INTERVAL.as_millis() as u64 * u64::from(EXPORT_WAIT_ATTEMPTS),
        })
    }
}

impl SensorReader for SysfsGpioSensor {
    fn read(&mut self) -> Result<SensorLevel, SensorError> {
        let path = self.line_dir().join("value");
        let raw = fs::read_to_string(&path).map_err(|source| SensorError::Io {
            path: path.clone(),
            source,
        })?;

        let level = match raw.trim() {
            "0" => SensorLevel::Low,
            "1" => SensorLevel::High,
            other => {
                return Err(SensorError::InvalidValue {
                    path,
                    value: other.to_string(),
                })
            }
        };

        Ok(if self.active_low {
            level.inverted()
        } else {
            level
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.exported_by_us {
            match write_attr(&self.root.join("unexport"), &self.pin.to_string()) {
                Ok(()) => info!(pin = self.pin, "GPIO line released"),
                Err(e) => warn!(pin = self.pin, error = %e, "Failed to unexport GPIO line"),
            }
        }
    }
}

impl Drop for SysfsGpioSensor {
    fn drop(&mut self) {
        self.release();
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), SensorError> {
    fs::write(path, value).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fake_line(pin: u32, value: &str) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        let line = root.path().join(format!("gpio{pin}"));
        fs::create_dir_all(&line).unwrap();
        fs::write(line.join("direction"), "out").unwrap();
        fs::write(line.join("value"), value).unwrap();
        root
    }

    #[test]
    fn test_open_existing_line_sets_direction_in() {
        let root = fake_line(17, "0\n");
        let _sensor = SysfsGpioSensor::open_at(root.path(), 17, false).unwrap();

        let direction = fs::read_to_string(root.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "in");
    }

    #[test]
    fn test_read_levels() {
        let root = fake_line(4, "1\n");
        let mut sensor = SysfsGpioSensor::open_at(root.path(), 4, false).unwrap();
        assert_eq!(sensor.read().unwrap(), SensorLevel::High);

        fs::write(root.path().join("gpio4/value"), "0\n").unwrap();
        assert_eq!(sensor.read().unwrap(), SensorLevel::Low);
    }

    #[test]
    fn test_active_low_inverts() {
        let root = fake_line(4, "1");
        let mut sensor = SysfsGpioSensor::open_at(root.path(), 4, true).unwrap();
        assert_eq!(sensor.read().unwrap(), SensorLevel::Low);
    }

    #[test]
    fn test_garbage_value_is_rejected() {
        let root = fake_line(4, "maybe");
        let mut sensor = SysfsGpioSensor::open_at(root.path(), 4, false).unwrap();
        assert!(matches!(
            sensor.read(),
            Err(SensorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_line_that_never_appears_fails_init() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("export"), "").unwrap();

        let result = SysfsGpioSensor::open_at(root.path(), 22, false);
        assert!(matches!(result, Err(SensorError::NotReady { pin: 22, .. })));
        assert_eq!(
            fs::read_to_string(root.path().join("export")).unwrap(),
            "22"
        );
    }

    #[tokio::test]
    async fn test_export_wait_does_not_stall_the_runtime() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("export"), "").unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let result = SysfsGpioSensor::open_blocking_task(root.path(), 23, false).await;
        ticker.abort();

        assert!(matches!(result, Err(SensorError::NotReady { pin: 23, .. })));
        assert!(ticks.load(Ordering::SeqCst) > 5);
    }

    #[tokio::test]
    async fn test_open_blocking_task_configures_line() {
        let root = fake_line(18, "1");
        let mut sensor = SysfsGpioSensor::open_blocking_task(root.path(), 18, false)
            .await
            .unwrap();
        assert_eq!(sensor.read().unwrap(), SensorLevel::High);
    }

    #[test]
    fn test_release_leaves_preexisting_line_exported() {
        let root = fake_line(5, "0");
        let mut sensor = SysfsGpioSensor::open_at(root.path(), 5, false).unwrap();
        sensor.release();
        sensor.release();
        assert!(!root.path().join("unexport").exists());
    }
}
