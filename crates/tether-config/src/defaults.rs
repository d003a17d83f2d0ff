//! Default values applied when a configuration source omits a field.

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default interval after which a blocked read yields to check for shutdown.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default budget for establishing the TCP connection and handshake.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
