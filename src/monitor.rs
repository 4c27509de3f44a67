//! Connection health tracking.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthPolicy;

/// Lifecycle state of the panel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Why a reconnect was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The link reported an error or end of stream.
    LinkLost(String),
    /// No message decoded within the heartbeat timeout.
    HeartbeatTimeout(Duration),
    /// Too many consecutive empty reads.
    ReadFailures(u32),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkLost(reason) => write!(f, "link lost ({reason})"),
            Self::HeartbeatTimeout(elapsed) => {
                write!(f, "no message for {:.1}s", elapsed.as_secs_f64())
            }
            Self::ReadFailures(n) => write!(f, "{n} consecutive empty reads"),
        }
    }
}

/// Applies the configured [`HealthPolicy`] to read outcomes.
///
/// A trip is reported once and then latched until [`reset`](Self::reset)
/// or the next successful decode.
#[derive(Debug)]
pub struct ConnectionMonitor {
    policy: HealthPolicy,
    last_message: Instant,
    empty_reads: u32,
    tripped: bool,
}

impl ConnectionMonitor {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            last_message: Instant::now(),
            empty_reads: 0,
            tripped: false,
        }
    }

    /// A message decoded into settings.
    pub fn record_decoded(&mut self) {
        self.record_decoded_at(Instant::now());
    }

    pub fn record_decoded_at(&mut self, now: Instant) {
        self.last_message = now;
        self.empty_reads = 0;
        self.tripped = false;
    }

    /// A read returned nothing (timeout, or nothing decodable).
    pub fn record_empty(&mut self) {
        self.empty_reads = self.empty_reads.saturating_add(1);
    }

    #[cfg(test)]
    pub fn empty_reads(&self) -> u32 {
        self.empty_reads
    }

    /// Check the policy. Returns the trigger the first time it trips.
    pub fn check(&mut self) -> Option<Trigger> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&mut self, now: Instant) -> Option<Trigger> {
        if self.tripped {
            return None;
        }

        let trigger = match self.policy {
            HealthPolicy::Heartbeat { timeout } => {
                let elapsed = now.saturating_duration_since(self.last_message);
                (elapsed > timeout).then_some(Trigger::HeartbeatTimeout(elapsed))
            }
            HealthPolicy::FailureCount { threshold } => (self.empty_reads >= threshold)
                .then_some(Trigger::ReadFailures(self.empty_reads)),
        };

        if trigger.is_some() {
            self.tripped = true;
        }
        trigger
    }

    /// Start fresh, e.g. after a new link was established.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.record_decoded_at(now);
    }
}
