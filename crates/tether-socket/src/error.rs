//! Error types for the socket engine.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::ids::CommandId;
use crate::protocol::ProtocolError;

/// Errors raised by [`Socket`](crate::Socket) operations and its registries.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Reading from or writing to the connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// `disconnect` was called without an open connection.
    #[error("could not disconnect: no connection exists")]
    NotConnected,

    /// A response arrived for an id with no registered command.
    #[error("no pending command with id {id}")]
    NoSuchCommand {
        /// Id carried by the orphaned response.
        id: CommandId,
    },

    /// Removal was requested for a listener that is not registered.
    #[error("no matching handler registered for event '{method}'")]
    HandlerNotFound {
        /// Event method the listener was registered under.
        method: String,
    },

    /// An inbound frame had neither a usable id nor a method.
    #[error("unknown response from web socket: id={id:?}, method={method:?}")]
    MalformedEnvelope {
        /// Raw id field, if any.
        id: Option<i64>,
        /// Raw method field, if any.
        method: Option<String>,
    },

    /// An event listener panicked.
    #[error("listener #{index} for event '{method}' failed: {message}")]
    ListenerFailure {
        /// Event being delivered.
        method: String,
        /// Position of the listener in registration order.
        index: usize,
        /// Panic payload rendered as text.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Configuration was missing or invalid.
    #[error(transparent)]
    Config(#[from] tether_config::ConfigError),

    /// A command completed unsuccessfully.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Terminal failure delivered to a [`CommandHandle`](crate::CommandHandle).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The remote endpoint answered with an error object.
    #[error("remote returned error: {0}")]
    Protocol(ProtocolError),

    /// The command payload could not be written to the connection.
    #[error("failed to send command payload to socket connection: {message}")]
    Transport {
        /// Rendered transport failure.
        message: String,
    },

    /// The command payload could not be serialized.
    #[error("failed to encode command payload: {message}")]
    Encode {
        /// Rendered codec failure.
        message: String,
    },

    /// The socket stopped before a response arrived.
    #[error("socket stopped before the command was answered")]
    Stopped,

    /// The caller's deadline passed before a response arrived.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline in milliseconds.
        timeout_ms: u128,
    },

    /// The resolving side went away without delivering an outcome.
    #[error("command was abandoned without an outcome")]
    Abandoned,
}

/// Connection-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// The remote side closed the connection.
    #[error("connection closed")]
    Closed,

    /// The endpoint cannot be dialled.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The opening handshake stopped part way.
    #[error("websocket handshake interrupted")]
    HandshakeInterrupted,
}

impl From<tungstenite::Error> for TransportError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            tungstenite::Error::Io(io) => Self::Io(io),
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

impl SocketError {
    /// Wraps a thread spawn failure.
    pub(crate) fn spawn(name: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source: Arc::new(source),
        }
    }
}

impl From<&TransportError> for CommandError {
    fn from(error: &TransportError) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}
