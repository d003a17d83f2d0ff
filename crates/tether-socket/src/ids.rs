//! Identifier generators for socket instances and command correlation.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counter backing [`SocketId::next`].
static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Diagnostic identifier for one [`Socket`](crate::Socket).
///
/// Only used to correlate log lines; it never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Allocates the next process-unique socket id, starting at 1.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Correlation id linking a command to its response.
///
/// Zero is reserved: the generator never issues it, so it can stand in for
/// "no command" when routing malformed envelopes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// The reserved id that no command is ever assigned.
    pub const UNASSIGNED: Self = Self(0);

    /// Wraps a raw id received from the wire.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Per-socket monotonic generator for [`CommandId`]s.
#[derive(Debug, Default)]
pub struct CommandIdGenerator {
    last: Mutex<u64>,
}

impl CommandIdGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next id.
    #[must_use]
    pub fn next(&self) -> CommandId {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = last.saturating_add(1);
        CommandId(*last)
    }

    /// Returns the most recently issued id, or [`CommandId::UNASSIGNED`]
    /// before the first call to [`CommandIdGenerator::next`].
    #[must_use]
    pub fn current(&self) -> CommandId {
        let last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        CommandId(*last)
    }
}
