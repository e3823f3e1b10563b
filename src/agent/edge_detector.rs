//! Door transition sampling loop
//!
//! Samples the sensor at a fixed period and compares each sample with the
//! previous one, starting from a baseline read before the loop is entered.
//! Only the transitions selected by [`EdgeTrigger`] are published; with the
//! default `Rising` trigger LOW to HIGH publishes `open` and HIGH to LOW is
//! ignored.

use super::publisher::{EventPublisher, PublishOutcome};
use super::shutdown_requested;
use crate::protocol::{EventClock, EventKind};
use crate::sensor::{SensorLevel, SensorReader};
use crate::transport::BrokerClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Which level changes produce an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeTrigger {
    /// LOW to HIGH publishes `open`
    #[default]
    Rising,
    /// HIGH to LOW publishes `close`
    Falling,
    Both,
}

impl EdgeTrigger {
    fn on_rising(self) -> bool {
        matches!(self, EdgeTrigger::Rising | EdgeTrigger::Both)
    }

    fn on_falling(self) -> bool {
        matches!(self, EdgeTrigger::Falling | EdgeTrigger::Both)
    }
}

impl FromStr for EdgeTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rising" => Ok(EdgeTrigger::Rising),
            "falling" => Ok(EdgeTrigger::Falling),
            "both" => Ok(EdgeTrigger::Both),
            other => Err(format!(
                "unknown edge trigger '{other}', expected rising, falling or both"
            )),
        }
    }
}

impl fmt::Display for EdgeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeTrigger::Rising => "rising",
            EdgeTrigger::Falling => "falling",
            EdgeTrigger::Both => "both",
        };
        f.write_str(name)
    }
}

/// Pure transition detection against the previous sample
#[derive(Debug, Clone)]
pub struct EdgeTracker {
    previous: SensorLevel,
    trigger: EdgeTrigger,
}

impl EdgeTracker {
    pub fn new(baseline: SensorLevel, trigger: EdgeTrigger) -> Self {
        Self {
            previous: baseline,
            trigger,
        }
    }

    pub fn previous(&self) -> SensorLevel {
        self.previous
    }

    /// Record a sample and report the event it triggers, if any
    pub fn observe(&mut self, level: SensorLevel) -> Option<EventKind> {
        let previous = std::mem::replace(&mut self.previous, level);
        match (previous, level) {
            (SensorLevel::Low, SensorLevel::High) if self.trigger.on_rising() => {
                Some(EventKind::Open)
            }
            (SensorLevel::High, SensorLevel::Low) if self.trigger.on_falling() => {
                Some(EventKind::Close)
            }
            _ => None,
        }
    }
}

/// Tracks time since the last open event
///
/// Fires at most once per threshold: the reference point moves to the
/// firing instant whether or not the resulting publish succeeds.
#[derive(Debug, Clone)]
pub struct InactivityWatch {
    threshold: Duration,
    reference: Instant,
}

impl InactivityWatch {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            reference: now,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn record_open(&mut self, now: Instant) {
        self.reference = now;
    }

    /// Elapsed time since the reference if the threshold has been reached
    pub fn poll(&mut self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.reference);
        if elapsed < self.threshold {
            return None;
        }
        self.reference = now;
        Some(elapsed)
    }
}

/// Static settings for the sampling loop
#[derive(Debug, Clone)]
pub struct EdgeDetectorSettings {
    pub topic: String,
    pub poll_interval: Duration,
    pub trigger: EdgeTrigger,
    pub inactivity_threshold: Option<Duration>,
}

/// Sampling loop over one sensor
pub struct EdgeDetector<S: SensorReader, B: BrokerClient> {
    sensor: S,
    tracker: EdgeTracker,
    inactivity: Option<InactivityWatch>,
    settings: EdgeDetectorSettings,
    publisher: EventPublisher<B>,
    clock: EventClock,
}

impl<S: SensorReader, B: BrokerClient> EdgeDetector<S, B> {
    /// Build a detector around a sensor whose baseline has already been read
    pub fn new(
        sensor: S,
        baseline: SensorLevel,
        settings: EdgeDetectorSettings,
        publisher: EventPublisher<B>,
        clock: EventClock,
    ) -> Self {
        info!(
            baseline = baseline.as_bit(),
            trigger = %settings.trigger,
            "Sensor baseline established"
        );

        let inactivity = settings
            .inactivity_threshold
            .map(|threshold| InactivityWatch::new(threshold, Instant::now()));

        Self {
            sensor,
            tracker: EdgeTracker::new(baseline, settings.trigger),
            inactivity,
            settings,
            publisher,
            clock,
        }
    }

    /// Sample until shutdown, then hand the sensor back for release
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> S {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            topic = %self.settings.topic,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Edge detector started"
        );

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    if self.sample().await == PublishOutcome::ShutdownRequested {
                        break;
                    }
                }
            }
        }

        info!("Edge detector stopped");
        self.sensor
    }

    async fn sample(&mut self) -> PublishOutcome {
        let level = match self.sensor.read() {
            Ok(level) => level,
            Err(e) => {
                warn!(error = %e, "Sensor read failed, skipping sample");
                return PublishOutcome::Dropped;
            }
        };
        let now = Instant::now();

        let mut outcome = PublishOutcome::Delivered;
        if let Some(kind) = self.tracker.observe(level) {
            if kind == EventKind::Open {
                if let Some(watch) = self.inactivity.as_mut() {
                    watch.record_open(now);
                }
            }
            debug!(kind = kind.label(), level = level.as_bit(), "Door transition detected");
            outcome = self
                .publisher
                .publish(&self.settings.topic, &self.clock.event(kind))
                .await;
            if outcome == PublishOutcome::ShutdownRequested {
                return outcome;
            }
        }

        if let Some(elapsed) = self.inactivity.as_mut().and_then(|watch| watch.poll(now)) {
            info!(
                since_last_open_secs = elapsed.as_secs(),
                "No open event within inactivity threshold"
            );
            outcome = self
                .publisher
                .publish(
                    &self.settings.topic,
                    &self.clock.event(EventKind::not_open(elapsed)),
                )
                .await;
        }

        outcome
    }
}
