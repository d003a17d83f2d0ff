//! The public engine handle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_config::{Config, ConnectionSettings};
use tracing::{debug, warn};
use url::Url;

use crate::connection::ConnectionManager;
use crate::dispatch::{self, DispatchState, SocketCore, StateCell};
use crate::error::{CommandError, SocketError};
use crate::ids::{CommandId, CommandIdGenerator, SocketId};
use crate::protocol::CommandPayload;
use crate::registry::{
    CommandHandle, CommandRegistry, EventHandler, HandlerRegistry, PendingCommand,
};
use crate::transport::Connector;
use crate::websocket::WebSocketConnector;

/// Log target for socket operations.
pub(crate) const SOCKET_TARGET: &str = "tether_socket::socket";

/// A remote-debugging session over one persistent connection.
///
/// Construction starts a background dispatch loop that drains the
/// connection, resolves command responses, and hands events to an event
/// worker thread. All methods take `&self` and may be called from any
/// thread; share a socket with `Arc<Socket>`.
///
/// Dropping the socket stops the loop and joins both threads.
pub struct Socket {
    core: Arc<SocketCore>,
    command_timeout: Option<Duration>,
    dispatcher: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Socket {
    /// Opens a session to `endpoint` with default connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Spawn`] when the background threads cannot be
    /// started.
    pub fn new(endpoint: Url) -> Result<Self, SocketError> {
        let settings = ConnectionSettings::default();
        Self::with_connector(endpoint, &settings, WebSocketConnector::new(&settings))
    }

    /// Opens a session described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Config`] when the configuration is invalid or
    /// names no endpoint, and [`SocketError::Spawn`] when the background
    /// threads cannot be started.
    pub fn from_config(config: &Config) -> Result<Self, SocketError> {
        config.validate()?;
        let endpoint = config.require_endpoint()?.clone();
        Self::with_connector(
            endpoint,
            &config.connection,
            WebSocketConnector::new(&config.connection),
        )
    }

    /// Opens a session that dials `endpoint` through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Spawn`] when the background threads cannot be
    /// started.
    pub fn with_connector(
        endpoint: Url,
        settings: &ConnectionSettings,
        connector: impl Connector + 'static,
    ) -> Result<Self, SocketError> {
        let id = SocketId::next();
        let core = Arc::new(SocketCore {
            id,
            poll_interval: settings.poll_interval(),
            connection: ConnectionManager::new(id, endpoint, Box::new(connector)),
            commands: CommandRegistry::new(),
            handlers: HandlerRegistry::new(),
            command_ids: CommandIdGenerator::new(),
            state: StateCell::new(),
        });

        let (events, deliveries) = dispatch::event_channel();
        let worker_name = format!("tether-events-{}", id.get());
        let worker = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || dispatch::run_event_worker(id, &deliveries))
            .map_err(|source| SocketError::spawn(worker_name, source))?;

        let dispatcher_name = format!("tether-socket-{}", id.get());
        let loop_core = Arc::clone(&core);
        let dispatcher = match thread::Builder::new()
            .name(dispatcher_name.clone())
            .spawn(move || dispatch::run(&loop_core, events))
        {
            Ok(handle) => handle,
            Err(source) => {
                // The worker exits once the failed closure drops its sender.
                join_quietly(id, worker);
                return Err(SocketError::spawn(dispatcher_name, source));
            }
        };

        debug!(
            target: SOCKET_TARGET,
            socket_id = %id,
            endpoint = %core.connection.endpoint(),
            "socket started"
        );
        Ok(Self {
            core,
            command_timeout: settings.command_timeout(),
            dispatcher: Some(dispatcher),
            worker: Some(worker),
        })
    }

    /// Diagnostic id of this socket.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.core.id
    }

    /// Endpoint this socket dials.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        self.core.connection.endpoint()
    }

    /// Sends `method` with optional `params` and returns a handle to wait
    /// on.
    ///
    /// Submission never fails synchronously. If the payload cannot be
    /// encoded or written, or the socket is stopping, the returned handle is
    /// already resolved with the corresponding [`CommandError`] and nothing
    /// is registered.
    pub fn submit_command(&self, method: &str, params: Option<Value>) -> CommandHandle {
        let id = self.core.command_ids.next();
        let (command, handle) = PendingCommand::new(id, method);

        if self.core.state.get() != DispatchState::Running {
            command.resolve(Err(CommandError::Stopped));
            return handle;
        }

        let payload = CommandPayload {
            id,
            method,
            params: params.as_ref(),
        };
        let frame = match serde_json::to_string(&payload) {
            Ok(frame) => frame,
            Err(error) => {
                command.resolve(Err(CommandError::Encode {
                    message: error.to_string(),
                }));
                return handle;
            }
        };

        self.core.commands.reserve(id);
        if let Err(error) = self.core.connection.write_frame(&frame) {
            self.core.commands.release(id);
            warn!(
                target: SOCKET_TARGET,
                socket_id = %self.core.id,
                command_id = %id,
                method,
                %error,
                "failed to send command"
            );
            command.resolve(Err(CommandError::from(&error)));
            return handle;
        }
        debug!(
            target: SOCKET_TARGET,
            socket_id = %self.core.id,
            command_id = %id,
            method,
            "command sent"
        );
        self.core.commands.register(command);

        // Teardown may have drained the registry between the state check and
        // registration.
        if self.core.state.get() != DispatchState::Running
            && self
                .core
                .commands
                .resolve(id, Err(CommandError::Stopped))
                .is_ok()
        {
            debug!(
                target: SOCKET_TARGET,
                socket_id = %self.core.id,
                command_id = %id,
                "command failed: socket is stopping"
            );
        }
        handle
    }

    /// Sends a command with typed parameters and waits for a typed result.
    ///
    /// Applies the configured command timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Codec`] when the parameters cannot be encoded
    /// or the result cannot be decoded into `R`, and
    /// [`SocketError::Command`] when the command fails.
    pub fn send_command<P, R>(&self, method: &str, params: &P) -> Result<R, SocketError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let encoded = serde_json::to_value(params)?;
        let handle = self.submit_command(method, Some(encoded));
        let result = match self.command_timeout {
            Some(timeout) => handle.wait_timeout(timeout),
            None => handle.wait(),
        }?;
        Ok(serde_json::from_value(result)?)
    }

    /// Registers `handler` for its event method.
    pub fn add_event_handler(&self, handler: EventHandler) {
        self.core.handlers.add(handler);
    }

    /// Unregisters one registration of `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::HandlerNotFound`] when `handler` is not
    /// registered.
    pub fn remove_event_handler(&self, handler: &EventHandler) -> Result<(), SocketError> {
        self.core.handlers.remove(handler)
    }

    /// Number of listeners registered for the event `method`.
    #[must_use]
    pub fn event_handler_count(&self, method: &str) -> usize {
        self.core.handlers.count(method)
    }

    /// Opens the connection if it is not already open.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Transport`] when the endpoint cannot be
    /// reached.
    pub fn connect(&self) -> Result<(), SocketError> {
        self.core.connection.connect()
    }

    /// Closes the connection.
    ///
    /// The dispatch loop keeps running and resumes reading once the
    /// connection is reopened by [`Socket::connect`] or a command.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NotConnected`] when no connection is open, or
    /// [`SocketError::Transport`] when the close handshake fails (the
    /// connection is discarded either way).
    pub fn disconnect(&self) -> Result<(), SocketError> {
        self.core.connection.disconnect()
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.connection.is_connected()
    }

    /// Asks the dispatch loop to stop. Returns immediately; see
    /// [`Socket::wait_stopped`].
    pub fn stop(&self) {
        if self.core.state.request_stop() {
            debug!(
                target: SOCKET_TARGET,
                socket_id = %self.core.id,
                "stop requested"
            );
        }
    }

    /// Current lifecycle state of the dispatch loop.
    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.core.state.get()
    }

    /// Blocks until the dispatch loop has stopped or `timeout` passes.
    /// Returns whether it stopped.
    #[must_use]
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.core.state.wait_stopped(timeout)
    }

    /// The most recently issued command id.
    #[must_use]
    pub fn current_command_id(&self) -> CommandId {
        self.core.command_ids.current()
    }

    /// Number of commands awaiting a response.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.core.commands.len()
    }

    /// Whether `id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: CommandId) -> bool {
        self.core.commands.contains(id)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Socket")
            .field("id", &self.core.id)
            .field("endpoint", self.core.connection.endpoint())
            .field("state", &self.core.state.get())
            .finish_non_exhaustive()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.stop();
        if let Some(dispatcher) = self.dispatcher.take() {
            join_quietly(self.core.id, dispatcher);
        }
        if let Some(worker) = self.worker.take() {
            join_quietly(self.core.id, worker);
        }
    }
}

/// Joins `handle` unless it is the calling thread, as happens when the
/// last reference to a socket is dropped inside one of its own listeners.
fn join_quietly(socket_id: SocketId, handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let name = handle.thread().name().map(str::to_owned);
    if handle.join().is_err() {
        warn!(
            target: SOCKET_TARGET,
            socket_id = %socket_id,
            thread = name.as_deref().unwrap_or("unnamed"),
            "background thread panicked"
        );
    }
}
