//! In-memory remote endpoint implementing [`Connector`].
//!
//! Each connect opens a fresh link. Tests push inbound frames onto the
//! current link and observe every frame the engine writes, across links.

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use url::Url;

use crate::error::TransportError;
use crate::transport::{Connection, Connector, FrameReader, FrameWriter, ReadOutcome};

/// One connection's inbound queue.
#[derive(Default)]
struct Link {
    inbound: Mutex<LinkState>,
    arrived: Condvar,
}

#[derive(Default)]
struct LinkState {
    frames: VecDeque<String>,
    closed: bool,
}

impl Link {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, frame: &str) {
        self.lock().frames.push_back(frame.to_owned());
        self.arrived.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Default)]
struct RemoteState {
    connects: usize,
    refuse_connections: bool,
    fail_writes: bool,
    fail_close: bool,
    write_delay: Option<Duration>,
    writes_started: usize,
    current: Option<Arc<Link>>,
    written: VecDeque<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<RemoteState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The far end of every connection a [`MemoryConnector`] opens.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryRemote {
    /// Creates a remote that accepts connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint used by sockets wired to a memory remote.
    #[must_use]
    pub fn endpoint() -> Url {
        Url::parse("ws://127.0.0.1:9222/devtools/page/memory").expect("valid test endpoint")
    }

    /// Connector whose readers report idle after `poll_interval`.
    #[must_use]
    pub fn connector(&self, poll_interval: Duration) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
            poll_interval,
        }
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.lock().connects
    }

    /// Makes subsequent connects fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.lock().refuse_connections = refuse;
    }

    /// Makes subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    /// Makes every subsequent write stall for `delay` before it lands.
    pub fn delay_writes(&self, delay: Duration) {
        self.shared.lock().write_delay = Some(delay);
    }

    /// Number of writes that have begun, including stalled ones.
    #[must_use]
    pub fn writes_started(&self) -> usize {
        self.shared.lock().writes_started
    }

    /// Makes subsequent closes report an error after closing.
    pub fn fail_close(&self, fail: bool) {
        self.shared.lock().fail_close = fail;
    }

    /// Whether an open link exists.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.shared
            .lock()
            .current
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    fn wait_for_link(&self, timeout: Duration) -> Option<Arc<Link>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(link) = state.current.as_ref().filter(|link| !link.is_closed()) {
                return Some(Arc::clone(link));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Delivers `frame` to the engine over the open link, waiting briefly
    /// for one to be established.
    ///
    /// # Panics
    ///
    /// Panics when no link opens within two seconds.
    pub fn inject(&self, frame: &str) {
        self.wait_for_link(Duration::from_secs(2))
            .expect("no open link to inject into")
            .push(frame);
    }

    /// Delivers `value` as a JSON frame.
    pub fn inject_json(&self, value: &Value) {
        self.inject(&value.to_string());
    }

    /// Closes the open link from the remote side.
    pub fn hang_up(&self) {
        if let Some(link) = self.shared.lock().current.take() {
            link.close();
        }
        self.shared.changed.notify_all();
    }

    /// Next frame written by the engine, waiting up to `timeout`.
    #[must_use]
    pub fn next_written(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(frame) = state.written.pop_front() {
                return Some(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Next command written by the engine, decoded.
    ///
    /// # Panics
    ///
    /// Panics when nothing is written within two seconds or the frame is
    /// not JSON.
    pub fn next_command(&self) -> Value {
        let frame = self
            .next_written(Duration::from_secs(2))
            .expect("engine wrote no command");
        serde_json::from_str(&frame).expect("command frame is JSON")
    }

    /// Answers the next written command with `result`; returns its id.
    pub fn respond_to_next(&self, result: &Value) -> u64 {
        let command = self.next_command();
        let id = command["id"].as_u64().expect("command carries an id");
        self.inject_json(&serde_json::json!({"id": id, "result": result}));
        id
    }
}

/// Opens links on a [`MemoryRemote`].
pub struct MemoryConnector {
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl Connector for MemoryConnector {
    fn connect(&self, _endpoint: &Url) -> Result<Connection, TransportError> {
        let link = {
            let mut state = self.shared.lock();
            if state.refuse_connections {
                return Err(TransportError::Io(io::Error::new(
                    ErrorKind::ConnectionRefused,
                    "memory remote refused the connection",
                )));
            }
            state.connects += 1;
            let link = Arc::new(Link::default());
            if let Some(previous) = state.current.replace(Arc::clone(&link)) {
                previous.close();
            }
            link
        };
        self.shared.changed.notify_all();
        Ok(Connection::new(
            MemoryReader {
                link: Arc::clone(&link),
                poll_interval: self.poll_interval,
            },
            MemoryWriter {
                link,
                shared: Arc::clone(&self.shared),
            },
        ))
    }
}

struct MemoryReader {
    link: Arc<Link>,
    poll_interval: Duration,
}

impl FrameReader for MemoryReader {
    fn read_frame(&mut self) -> Result<ReadOutcome, TransportError> {
        let mut inbound = self.link.lock();
        if inbound.frames.is_empty() && !inbound.closed {
            inbound = self
                .link
                .arrived
                .wait_timeout(inbound, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if let Some(frame) = inbound.frames.pop_front() {
            return Ok(ReadOutcome::Frame(frame));
        }
        if inbound.closed {
            return Err(TransportError::Closed);
        }
        Ok(ReadOutcome::Idle)
    }
}

struct MemoryWriter {
    link: Arc<Link>,
    shared: Arc<Shared>,
}

impl FrameWriter for MemoryWriter {
    fn write_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.link.is_closed() {
            return Err(TransportError::Closed);
        }
        let delay = {
            let mut state = self.shared.lock();
            if state.fail_writes {
                return Err(TransportError::Io(io::Error::new(
                    ErrorKind::BrokenPipe,
                    "memory remote rejected the write",
                )));
            }
            state.writes_started += 1;
            state.write_delay
        };
        self.shared.changed.notify_all();
        if let Some(stall) = delay {
            thread::sleep(stall);
        }
        self.shared.lock().written.push_back(frame.to_owned());
        self.shared.changed.notify_all();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.link.close();
        let fail = {
            let mut state = self.shared.lock();
            if state
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &self.link))
            {
                state.current = None;
            }
            state.fail_close
        };
        self.shared.changed.notify_all();
        if fail {
            return Err(TransportError::Io(io::Error::other(
                "memory remote failed to close",
            )));
        }
        Ok(())
    }
}
