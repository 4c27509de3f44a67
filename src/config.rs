//! Runtime configuration.
//!
//! Built once from the command line and shared read-only by every
//! component afterwards.

use std::time::Duration;

use crate::settings::StepSizeTable;

/// Identity prefix announced by the panel firmware.
pub const DEFAULT_HANDSHAKE_ID: &str = "TEENSY_OCP_001";

/// Default baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// How link health is judged between messages.
///
/// Only one policy is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPolicy {
    /// Reconnect when no message decoded for longer than `timeout`.
    Heartbeat { timeout: Duration },
    /// Reconnect after `threshold` consecutive reads returned nothing.
    FailureCount { threshold: u32 },
}

impl HealthPolicy {
    pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::Heartbeat {
            timeout: Self::DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Link, handshake and reconnection parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Pin discovery to a single port instead of scanning.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Prefix a handshake line (and a CSV id field) must start with.
    pub handshake_id: String,
    /// Read timeout while the device reboots after open.
    pub settle_timeout: Duration,
    /// Firmware reboots when the port opens (DTR toggle).
    pub reset_delay: Duration,
    pub handshake_attempts: u32,
    pub handshake_read_timeout: Duration,
    /// Steady-state per-read timeout once connected.
    pub read_timeout: Duration,
    pub health: HealthPolicy,
    /// Pause between closing a dead link and rediscovering.
    pub reconnect_delay: Duration,
    /// Pause after a failed rediscovery before the next attempt.
    pub retry_delay: Duration,
    pub step_sizes: StepSizeTable,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD,
            handshake_id: DEFAULT_HANDSHAKE_ID.to_string(),
            settle_timeout: Duration::from_millis(100),
            reset_delay: Duration::from_millis(2000),
            handshake_attempts: 10,
            handshake_read_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(1000),
            health: HealthPolicy::default(),
            reconnect_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            step_sizes: StepSizeTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.handshake_id, "TEENSY_OCP_001");
        assert!(config.retry_delay > config.reconnect_delay);
        assert_eq!(
            config.health,
            HealthPolicy::Heartbeat {
                timeout: Duration::from_secs(15)
            }
        );
    }
}
