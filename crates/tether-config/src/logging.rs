//! Telemetry settings shared by every consumer of the socket engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::{default_log_filter_string, default_log_format};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Filter and format applied when installing the tracing subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// `EnvFilter` directive string, e.g. `info,tether_socket=debug`.
    pub log_filter: String,
    /// Output format for emitted events.
    pub log_format: LogFormat,
}

impl TelemetrySettings {
    /// Returns the configured filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}
