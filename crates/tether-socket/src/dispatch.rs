//! Background dispatch: one reader loop and one event worker per socket.
//!
//! The reader loop drains the connection, resolving command responses
//! inline and forwarding events, together with the listener snapshot taken
//! on arrival, to the event worker. Listeners therefore never block the
//! reader, and events are delivered in arrival order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::connection::{ClaimedReader, ConnectionManager};
use crate::error::{CommandError, SocketError};
use crate::ids::{CommandId, CommandIdGenerator, SocketId};
use crate::protocol::{Envelope, Event, Inbound, ProtocolError};
use crate::registry::{CommandRegistry, EventHandler, HandlerRegistry, fan_out};
use crate::transport::ReadOutcome;

/// Log target for the dispatch loop and event worker.
pub(crate) const DISPATCH_TARGET: &str = "tether_socket::dispatch";

/// Event announcing that the remote target crashed.
const TARGET_CRASHED: &str = "Inspector.targetCrashed";

/// Lifecycle of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Draining the connection.
    Running,
    /// Asked to stop; exits within one poll interval.
    StopRequested,
    /// Exited. Pending commands have been failed.
    Stopped,
}

/// [`DispatchState`] with change notification.
pub(crate) struct StateCell {
    state: Mutex<DispatchState>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(DispatchState::Running),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> DispatchState {
        *self.lock()
    }

    /// Moves `Running` to `StopRequested`. Returns whether this call made
    /// the transition.
    pub(crate) fn request_stop(&self) -> bool {
        let mut state = self.lock();
        if *state != DispatchState::Running {
            return false;
        }
        *state = DispatchState::StopRequested;
        self.changed.notify_all();
        true
    }

    fn mark_stopped(&self) {
        *self.lock() = DispatchState::Stopped;
        self.changed.notify_all();
    }

    /// Blocks until `Stopped` or until `timeout` passes.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        while *state != DispatchState::Stopped {
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(until) => {
                    let remaining = until.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    self.changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        true
    }
}

/// State shared between a socket's owner, its submitters and its threads.
pub(crate) struct SocketCore {
    pub(crate) id: SocketId,
    pub(crate) poll_interval: Duration,
    pub(crate) connection: ConnectionManager,
    pub(crate) commands: CommandRegistry,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) command_ids: CommandIdGenerator,
    pub(crate) state: StateCell,
}

/// An event queued for the worker with the listeners current on arrival.
pub(crate) struct Delivery {
    event: Event,
    listeners: Vec<EventHandler>,
}

/// Why the reader loop exited.
enum Exit {
    Requested,
    Failed(SocketError),
}

/// Runs the reader loop until stop is requested or the connection fails,
/// then tears down.
pub(crate) fn run(core: &SocketCore, events: Sender<Delivery>) {
    info!(
        target: DISPATCH_TARGET,
        socket_id = %core.id,
        endpoint = %core.connection.endpoint(),
        "dispatch loop started"
    );

    match drive(core, &events) {
        Exit::Requested => info!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            "dispatch loop stopping on request"
        ),
        Exit::Failed(failure) => error!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            error = %failure,
            "dispatch loop terminated"
        ),
    }

    drop(events);
    shut_down(core);
}

fn drive(core: &SocketCore, events: &Sender<Delivery>) -> Exit {
    let mut current: Option<ClaimedReader> = None;

    while core.state.get() == DispatchState::Running {
        if current.is_none() {
            match core.connection.claim_reader() {
                Ok(Some(claimed)) => {
                    debug!(
                        target: DISPATCH_TARGET,
                        socket_id = %core.id,
                        generation = claimed.generation,
                        "reading from connection"
                    );
                    current = Some(claimed);
                }
                Ok(None) => {
                    thread::sleep(core.poll_interval);
                    continue;
                }
                Err(failure) => return Exit::Failed(failure.into()),
            }
        }
        let Some(claimed) = current.as_mut() else {
            continue;
        };

        let generation = claimed.generation;
        match claimed.reader.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => {
                if let Err(failure) = handle_frame(core, events, &frame) {
                    return Exit::Failed(failure);
                }
            }
            Ok(ReadOutcome::Idle) => {
                if !core.connection.is_current(generation) {
                    release_stale(core, &mut current, generation);
                }
            }
            Err(failure) => {
                if core.connection.is_current(generation) {
                    return Exit::Failed(failure.into());
                }
                debug!(
                    target: DISPATCH_TARGET,
                    socket_id = %core.id,
                    generation,
                    error = %failure,
                    "read failed on a connection that was already replaced"
                );
                release_stale(core, &mut current, generation);
            }
        }
    }
    Exit::Requested
}

fn release_stale(core: &SocketCore, current: &mut Option<ClaimedReader>, generation: u64) {
    debug!(
        target: DISPATCH_TARGET,
        socket_id = %core.id,
        generation,
        "releasing reader of replaced connection"
    );
    *current = None;
}

/// Decodes and routes one frame. Only an undecodable frame is fatal.
fn handle_frame(
    core: &SocketCore,
    events: &Sender<Delivery>,
    frame: &str,
) -> Result<(), SocketError> {
    let value: Value = serde_json::from_str(frame)?;
    let envelope = Envelope::from_value(value).unwrap_or_else(|decode_error| {
        debug!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            error = %decode_error,
            "frame is JSON but not an envelope"
        );
        Envelope::default()
    });

    match envelope.classify() {
        Inbound::Response(response) => {
            if let Err(failure) = core.commands.resolve(response.id, response.outcome) {
                debug!(
                    target: DISPATCH_TARGET,
                    socket_id = %core.id,
                    command_id = %response.id,
                    error = %failure,
                    "dropping response"
                );
            }
        }
        Inbound::Event(event) => route_event(core, events, event),
        Inbound::Malformed(envelope) => handle_malformed(core, envelope),
    }
    Ok(())
}

fn route_event(core: &SocketCore, events: &Sender<Delivery>, event: Event) {
    if event.method == TARGET_CRASHED {
        error!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            params = %event.params,
            "remote target crashed"
        );
    }

    let listeners = core.handlers.listeners(&event.method);
    if listeners.is_empty() {
        debug!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            method = %event.method,
            "no listeners for event"
        );
        return;
    }
    if events.send(Delivery { event, listeners }).is_err() {
        warn!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            "event worker has gone away; event dropped"
        );
    }
}

/// The error reported for an envelope that is neither a response nor an
/// event, carrying its raw `id` and `method`.
fn malformed_envelope(envelope: Envelope) -> SocketError {
    SocketError::MalformedEnvelope {
        id: envelope.id,
        method: envelope.method,
    }
}

fn handle_malformed(core: &SocketCore, envelope: Envelope) {
    let failure = malformed_envelope(envelope);
    warn!(
        target: DISPATCH_TARGET,
        socket_id = %core.id,
        error = %failure,
        "malformed envelope"
    );
    let outcome = Err(CommandError::Protocol(ProtocolError::new(
        0,
        ProtocolError::UNKNOWN_RESPONSE,
    )));
    if let Err(undeliverable) = core.commands.resolve(CommandId::UNASSIGNED, outcome) {
        debug!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            error = %undeliverable,
            "malformed envelope matched no command"
        );
    }
}

fn shut_down(core: &SocketCore) {
    core.state.request_stop();
    match core.connection.disconnect() {
        Ok(()) | Err(SocketError::NotConnected) => {}
        Err(failure) => warn!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            error = %failure,
            "error closing connection during shutdown"
        ),
    }
    let failed = core.commands.fail_all(&CommandError::Stopped);
    if failed > 0 {
        info!(
            target: DISPATCH_TARGET,
            socket_id = %core.id,
            failed,
            "failed pending commands on shutdown"
        );
    }
    core.state.mark_stopped();
    info!(
        target: DISPATCH_TARGET,
        socket_id = %core.id,
        "dispatch loop stopped"
    );
}

/// Creates the channel feeding the event worker.
pub(crate) fn event_channel() -> (Sender<Delivery>, Receiver<Delivery>) {
    mpsc::channel()
}

/// Delivers queued events until the reader loop drops its sender.
pub(crate) fn run_event_worker(socket_id: SocketId, deliveries: &Receiver<Delivery>) {
    for Delivery { event, listeners } in deliveries {
        for failure in fan_out(&listeners, &event) {
            error!(
                target: DISPATCH_TARGET,
                socket_id = %socket_id,
                error = %failure,
                "event listener failed"
            );
        }
    }
    debug!(
        target: DISPATCH_TARGET,
        socket_id = %socket_id,
        "event worker finished"
    );
}
