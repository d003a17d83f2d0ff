//! Shared fixtures and helpers for socket tests.

mod memory;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rstest::fixture;
use tether_config::ConnectionSettings;

use crate::{Event, EventHandler, Socket};

pub use memory::MemoryRemote;

/// Poll interval used by test sockets.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(2);

/// A fresh remote endpoint.
#[fixture]
pub fn remote() -> MemoryRemote {
    MemoryRemote::new()
}

/// Starts a socket wired to `remote`.
#[must_use]
pub fn start_socket(remote: &MemoryRemote) -> Socket {
    let settings = ConnectionSettings::default().with_poll_interval(POLL_INTERVAL);
    Socket::with_connector(
        MemoryRemote::endpoint(),
        &settings,
        remote.connector(POLL_INTERVAL),
    )
    .expect("socket starts")
}

/// Polls `condition` until it holds or [`PATIENCE`] runs out.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Collects the events a listener receives, tagged with a label.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<(String, Event)>>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for `method` that records each event under `label`.
    #[must_use]
    pub fn handler(&self, method: &str, label: &str) -> EventHandler {
        let entries = Arc::clone(&self.entries);
        let tag = label.to_owned();
        EventHandler::new(method, move |event: &Event| {
            entries
                .lock()
                .expect("event log lock")
                .push((tag.clone(), event.clone()));
        })
    }

    /// Labels in the order their listeners ran.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("event log lock")
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Events received, in order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.entries
            .lock()
            .expect("event log lock")
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Number of listener invocations recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("event log lock").len()
    }
}
