//! Connection supervision for the shared broker client
//!
//! [`ConnectionSupervisor::ensure_connected`] is the single entry point for
//! (re)establishing the broker session. Concurrent callers are coalesced
//! behind one gate so only one `connect()` is ever in flight. Failed attempts
//! are retried forever after a backoff that shutdown can interrupt.

use super::shutdown_requested;
use crate::transport::BrokerClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Session state as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    AttemptStarted,
    AttemptSucceeded,
    AttemptFailed,
    /// The broker reported the link down outside of an attempt
    LinkLost,
    ShutdownRequested,
}

/// Result of [`ConnectionSupervisor::ensure_connected`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    ShutdownRequested,
}

/// Reconnection backoff
///
/// Attempt `n` (1-based) waits `backoff_pattern[n - 1]` while the pattern
/// lasts and `interval` after that. There is no attempt limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub backoff_pattern: Vec<Duration>,
    pub interval: Duration,
}

impl ReconnectPolicy {
    /// Same delay after every failure
    pub fn fixed(interval: Duration) -> Self {
        Self {
            backoff_pattern: Vec::new(),
            interval,
        }
    }

    pub fn with_pattern(backoff_pattern: Vec<Duration>, interval: Duration) -> Self {
        Self {
            backoff_pattern,
            interval,
        }
    }

    /// Delay after the given failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.interval)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(crate::config::DEFAULT_RECONNECT_INTERVAL_SECS))
    }
}

/// Pure state transition
pub fn determine_next_state(current: ConnectionState, event: ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::AttemptStarted => ConnectionState::Connecting,
        ConnectionEvent::AttemptSucceeded => ConnectionState::Connected,
        ConnectionEvent::AttemptFailed
        | ConnectionEvent::LinkLost
        | ConnectionEvent::ShutdownRequested => {
            if current == ConnectionState::Disconnected {
                current
            } else {
                ConnectionState::Disconnected
            }
        }
    }
}

pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("Broker connection lost");
        }
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("Broker connection established");
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            debug!("Broker connection attempt failed");
        }
        _ => {
            debug!(?from, ?to, "Connection state changed");
        }
    }
}

/// Serialized, infinitely retrying connect protocol
pub struct ConnectionSupervisor<B: BrokerClient> {
    broker: Arc<B>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    gate: Mutex<()>,
    attempts: AtomicU64,
    shutdown: watch::Receiver<bool>,
}

impl<B: BrokerClient> ConnectionSupervisor<B> {
    pub fn new(broker: Arc<B>, policy: ReconnectPolicy, shutdown: watch::Receiver<bool>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            policy,
            state_tx,
            gate: Mutex::new(()),
            attempts: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Total `connect()` calls made so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn apply(&self, event: ConnectionEvent) {
        let mut transition = None;
        self.state_tx.send_if_modified(|state| {
            let next = determine_next_state(*state, event);
            if next == *state {
                return false;
            }
            transition = Some((*state, next));
            *state = next;
            true
        });
        if let Some((from, to)) = transition {
            log_state_transition(from, to);
        }
    }

    /// Block until the broker is connected or shutdown is requested
    ///
    /// Returns immediately when the session is already up. Callers that
    /// arrive while another caller is dialing wait for that attempt instead
    /// of dialing again. Connection errors never escape; they are logged and
    /// retried after the backoff.
    pub async fn ensure_connected(&self) -> ConnectOutcome {
        if self.broker.is_connected() {
            self.apply(ConnectionEvent::AttemptSucceeded);
            return ConnectOutcome::Connected;
        }

        let _gate = self.gate.lock().await;

        // Another caller may have connected while we waited for the gate
        if self.broker.is_connected() {
            self.apply(ConnectionEvent::AttemptSucceeded);
            return ConnectOutcome::Connected;
        }
        self.apply(ConnectionEvent::LinkLost);

        let mut shutdown = self.shutdown.clone();
        let mut failures = 0u32;
        loop {
            if *shutdown.borrow() {
                self.apply(ConnectionEvent::ShutdownRequested);
                return ConnectOutcome::ShutdownRequested;
            }

            self.apply(ConnectionEvent::AttemptStarted);
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

            match self.broker.connect().await {
                Ok(()) => {
                    self.apply(ConnectionEvent::AttemptSucceeded);
                    info!(attempt, "broker connect succeeded");
                    return ConnectOutcome::Connected;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.policy.delay_for(failures);
                    self.apply(ConnectionEvent::AttemptFailed);
                    error!(
                        error = %e,
                        attempt,
                        consecutive_failures = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "broker connect failed"
                    );

                    if !interruptible_sleep(&mut shutdown, delay).await {
                        self.apply(ConnectionEvent::ShutdownRequested);
                        return ConnectOutcome::ShutdownRequested;
                    }
                }
            }
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first
///
/// Returns true if the sleep completed, false on shutdown.
async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown) => {
            info!("Shutdown requested during reconnect backoff");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
