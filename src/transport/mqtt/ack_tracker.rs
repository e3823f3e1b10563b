//! Packet-id bookkeeping for QoS 1 publishes
//!
//! Publishes leave the client one at a time, so the first packet id the
//! event loop assigns after a caller queues its request belongs to that
//! caller. Retransmits of earlier publishes reuse their old packet id and
//! are recognised by it, so neither a replayed publish nor its late
//! acknowledgement can complete the wrong caller.

use std::collections::HashSet;

/// Progress of the publish currently waiting for its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
enum Waiter {
    /// Queued, no packet id observed yet
    Queued,
    /// Written to the network under this packet id
    Sent(u16),
    /// Broker answered
    Done(Result<(), String>),
}

#[derive(Debug, Default)]
pub struct AckTracker {
    in_flight: HashSet<u16>,
    /// Requests abandoned before their packet id was observed
    orphans: usize,
    waiter: Option<Waiter>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A caller queued a QoS 1 publish and will wait for it
    pub fn begin(&mut self) {
        self.waiter = Some(Waiter::Queued);
    }

    /// The event loop wrote a publish with this packet id
    pub fn on_sent(&mut self, pkid: u16) {
        if pkid == 0 || !self.in_flight.insert(pkid) {
            // QoS 0, or a retransmit of an earlier publish
            return;
        }
        if self.orphans > 0 {
            self.orphans -= 1;
            return;
        }
        if self.waiter == Some(Waiter::Queued) {
            self.waiter = Some(Waiter::Sent(pkid));
        }
    }

    /// The broker answered the publish with this packet id
    pub fn on_ack(&mut self, pkid: u16, result: Result<(), String>) {
        self.in_flight.remove(&pkid);
        if self.waiter == Some(Waiter::Sent(pkid)) {
            self.waiter = Some(Waiter::Done(result));
        }
    }

    /// The broker rejected a publish without the packet id being known
    ///
    /// Only the waiting publish can be rejected: earlier publishes are
    /// retransmits and the client has no other traffic.
    pub fn on_rejected(&mut self, reason: String) {
        if let Some(Waiter::Sent(pkid)) = self.waiter {
            self.in_flight.remove(&pkid);
            self.waiter = Some(Waiter::Done(Err(reason)));
        }
    }

    /// Answer for the waiting publish, if the broker has given one
    pub fn take_result(&mut self) -> Option<Result<(), String>> {
        match self.waiter.take() {
            Some(Waiter::Done(result)) => Some(result),
            other => {
                self.waiter = other;
                None
            }
        }
    }

    /// The request never reached the event loop
    pub fn cancel(&mut self) {
        self.waiter = None;
    }

    /// The waiting caller gave up
    pub fn abandon(&mut self) {
        if self.waiter.take() == Some(Waiter::Queued) {
            self.orphans += 1;
        }
    }

    /// Packet id of the waiting publish once it has been written
    pub fn waiting_pkid(&self) -> Option<u16> {
        match self.waiter {
            Some(Waiter::Sent(pkid)) => Some(pkid),
            _ => None,
        }
    }
}
