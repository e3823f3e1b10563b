//! Canonical event payloads
//!
//! All event kinds share one schema:
//!
//! ```json
//! {"timestamp": "2024-05-01T08:30:00+09:00", "kind": "open"}
//! {"timestamp": "2024-05-01T08:30:00+09:00", "kind": "heartbeat"}
//! {"timestamp": "2024-05-02T08:30:00+09:00", "kind": "not_open", "since_last_open_secs": 86400}
//! ```
//!
//! The offset is always numeric; UTC is written `+00:00`, never `Z`.
//!
//! Earlier deployments used per-script field names (`status`, `sensor_value`,
//! `heart_beat`, `not_open`). Consumers must switch to the `kind` field; the
//! old shapes are not emitted.

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

/// One message published to the broker
///
/// # Examples
///
/// ```rust
/// use door_sensor_agent::protocol::{DeviceEvent, EventKind};
/// use chrono::{FixedOffset, TimeZone};
///
/// let jst = FixedOffset::east_opt(9 * 3600).unwrap();
/// let event = DeviceEvent::new(
///     jst.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
///     EventKind::Open,
/// );
///
/// let json = String::from_utf8(event.to_payload().unwrap()).unwrap();
/// assert_eq!(json, r#"{"timestamp":"2024-05-01T08:30:00+09:00","kind":"open"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// RFC 3339, whole seconds, explicit offset
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub kind: EventKind,
}

fn serialize_timestamp<S>(timestamp: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Secs, false))
}

/// Message discriminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Door went from closed to open
    Open,
    /// Door went from open to closed (only with falling-edge triggering)
    Close,
    /// Periodic liveness signal
    Heartbeat,
    /// No open event for a full inactivity window
    NotOpen { since_last_open_secs: u64 },
}

impl EventKind {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Heartbeat => "heartbeat",
            EventKind::NotOpen { .. } => "not_open",
        }
    }

    pub fn not_open(since_last_open: Duration) -> Self {
        EventKind::NotOpen {
            since_last_open_secs: since_last_open.as_secs(),
        }
    }
}

impl DeviceEvent {
    pub fn new(timestamp: DateTime<FixedOffset>, kind: EventKind) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            kind,
        }
    }

    /// Serialize to the JSON bytes sent on the wire
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Wall-clock source for event timestamps in a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventClock {
    offset: FixedOffset,
}

impl EventClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Clock for a whole-hour offset; out-of-range values fall back to UTC
    pub fn from_offset_hours(hours: i32) -> Self {
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current time truncated to whole seconds
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset).trunc_subsecs(0)
    }

    /// Build an event stamped with the current time
    pub fn event(&self, kind: EventKind) -> DeviceEvent {
        DeviceEvent::new(self.now(), kind)
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}
