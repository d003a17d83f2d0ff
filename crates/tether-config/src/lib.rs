//! Shared configuration for the tether remote-debugging client.
//!
//! Settings are plain `serde` types with defaults on every field, so a
//! partially populated JSON document or an empty environment still yields a
//! usable [`Config`]. Environment overrides are layered on top with
//! [`Config::apply_env_overrides`]; callers that need deterministic inputs
//! (tests, embedding hosts) use [`Config::apply_overrides_from`] with their
//! own lookup.

mod connection;
mod defaults;
mod endpoint;
mod logging;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use connection::ConnectionSettings;
pub use defaults::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use endpoint::{ENDPOINT_SCHEME, parse_endpoint, validate_endpoint};
pub use logging::{LogFormat, LogFormatParseError, TelemetrySettings};

/// Environment variable naming the debugging endpoint.
pub const ENV_ENDPOINT: &str = "TETHER_ENDPOINT";
/// Environment variable overriding the log filter.
pub const ENV_LOG_FILTER: &str = "TETHER_LOG_FILTER";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "TETHER_LOG_FORMAT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint to connect to, e.g. `ws://127.0.0.1:9222/devtools/browser/ID`.
    pub endpoint: Option<Url>,
    /// Connection and dispatch timing.
    pub connection: ConnectionSettings,
    /// Logging filter and format.
    pub telemetry: TelemetrySettings,
}

impl Config {
    /// Parses configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is not valid JSON or
    /// does not match the configuration shape.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(document).map_err(ConfigError::Parse)
    }

    /// Layers `TETHER_*` environment variables over the current values.
    ///
    /// # Errors
    ///
    /// See [`Config::apply_overrides_from`].
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Layers overrides supplied by `lookup` over the current values.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLogFormat`] or an endpoint error when an
    /// override cannot be parsed.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = present(ENV_ENDPOINT) {
            self.endpoint = Some(parse_endpoint(raw.trim())?);
        }
        if let Some(filter) = present(ENV_LOG_FILTER) {
            self.telemetry.log_filter = filter;
        }
        if let Some(raw) = present(ENV_LOG_FORMAT) {
            self.telemetry.log_format =
                LogFormat::from_str(raw.trim()).map_err(|source| ConfigError::InvalidLogFormat {
                    value: raw.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroPollInterval`] when the poll interval is zero
    /// and any endpoint validation error for a configured endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }

    /// Returns the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEndpoint`] when none is configured.
    pub fn require_endpoint(&self) -> Result<&Url, ConfigError> {
        self.endpoint.as_ref().ok_or(ConfigError::MissingEndpoint)
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be decoded.
    #[error("failed to parse configuration: {0}")]
    Parse(#[source] serde_json::Error),

    /// The endpoint text is not a URL.
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// Text that failed to parse.
        endpoint: String,
        /// Underlying parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The endpoint uses a scheme the transport cannot speak.
    #[error("unsupported endpoint scheme '{scheme}' (expected 'ws')")]
    UnsupportedScheme {
        /// Scheme found on the endpoint.
        scheme: String,
    },

    /// The endpoint has no host component.
    #[error("endpoint '{endpoint}' has no host")]
    MissingHost {
        /// Endpoint that lacked a host.
        endpoint: String,
    },

    /// No endpoint was configured.
    #[error("no endpoint configured (set TETHER_ENDPOINT)")]
    MissingEndpoint,

    /// A log format override did not name a known format.
    #[error("invalid log format '{value}': {source}")]
    InvalidLogFormat {
        /// Rejected value.
        value: String,
        /// Underlying parse failure.
        #[source]
        source: LogFormatParseError,
    },

    /// The dispatch loop cannot poll with a zero interval.
    #[error("connection.poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
}
