//! Timing knobs for the socket connection and its dispatch loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS};

/// Connection timing settings.
///
/// Durations are stored as milliseconds so they read naturally in JSON and
/// environment overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// How long a single read may block before the dispatch loop rechecks
    /// its stop flag.
    pub poll_interval_ms: u64,
    /// Budget for the TCP connect and WebSocket handshake.
    pub connect_timeout_ms: u64,
    /// Default deadline applied by typed command helpers. `None` waits
    /// indefinitely.
    pub command_timeout_ms: Option<u64>,
}

impl ConnectionSettings {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default command deadline, if one is configured.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = saturating_millis(interval);
        self
    }

    /// Sets the default command deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = Some(saturating_millis(timeout));
        self
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            command_timeout_ms: None,
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
