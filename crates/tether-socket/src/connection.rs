//! Connection lifecycle: lazy connect, idempotent reconnect, guarded writes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use url::Url;

use crate::error::{SocketError, TransportError};
use crate::ids::SocketId;
use crate::transport::{Connector, FrameReader, FrameWriter};

/// Log target for connection lifecycle operations.
pub(crate) const CONNECTION_TARGET: &str = "tether_socket::connection";

/// Write half shared between submitters; its mutex serializes frames.
type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

/// Guarded connection state.
enum ConnectionState {
    /// No channel is open.
    Disconnected,
    /// A channel is open.
    Connected {
        /// Identifies this channel among successive reconnects.
        generation: u64,
        /// Write half, locked independently of the state.
        writer: SharedWriter,
        /// Read half until the dispatch loop claims it.
        reader: Option<Box<dyn FrameReader>>,
    },
}

/// A read half claimed by the dispatch loop, tagged with its generation.
pub(crate) struct ClaimedReader {
    pub(crate) generation: u64,
    pub(crate) reader: Box<dyn FrameReader>,
}

/// Owns the channel to one endpoint.
pub(crate) struct ConnectionManager {
    socket_id: SocketId,
    endpoint: Url,
    connector: Box<dyn Connector>,
    state: Mutex<ConnectionState>,
    generations: Mutex<u64>,
}

impl ConnectionManager {
    pub(crate) fn new(socket_id: SocketId, endpoint: Url, connector: Box<dyn Connector>) -> Self {
        Self {
            socket_id,
            endpoint,
            connector,
            state: Mutex::new(ConnectionState::Disconnected),
            generations: Mutex::new(0),
        }
    }

    pub(crate) const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the channel unless one is already open.
    pub(crate) fn connect(&self) -> Result<(), SocketError> {
        let mut state = self.lock();
        self.connect_locked(&mut state)?;
        Ok(())
    }

    fn connect_locked(&self, state: &mut ConnectionState) -> Result<u64, TransportError> {
        if let ConnectionState::Connected { generation, .. } = state {
            return Ok(*generation);
        }

        debug!(
            target: CONNECTION_TARGET,
            socket_id = %self.socket_id,
            endpoint = %self.endpoint,
            "connecting"
        );
        let connection = self.connector.connect(&self.endpoint).inspect_err(|error| {
            debug!(
                target: CONNECTION_TARGET,
                socket_id = %self.socket_id,
                %error,
                "connection attempt failed"
            );
        })?;

        let generation = {
            let mut counter = self
                .generations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *counter += 1;
            *counter
        };
        *state = ConnectionState::Connected {
            generation,
            writer: Arc::new(Mutex::new(connection.writer)),
            reader: Some(connection.reader),
        };
        debug!(
            target: CONNECTION_TARGET,
            socket_id = %self.socket_id,
            endpoint = %self.endpoint,
            generation,
            "connection established"
        );
        Ok(generation)
    }

    /// Closes the channel.
    ///
    /// State is cleared even when the close itself fails.
    pub(crate) fn disconnect(&self) -> Result<(), SocketError> {
        let previous = std::mem::replace(&mut *self.lock(), ConnectionState::Disconnected);
        let ConnectionState::Connected {
            generation, writer, ..
        } = previous
        else {
            return Err(SocketError::NotConnected);
        };

        debug!(
            target: CONNECTION_TARGET,
            socket_id = %self.socket_id,
            generation,
            "disconnecting"
        );
        lock_writer(&writer).close().map_err(|error| {
            warn!(
                target: CONNECTION_TARGET,
                socket_id = %self.socket_id,
                generation,
                %error,
                "error while closing connection"
            );
            SocketError::from(error)
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(*self.lock(), ConnectionState::Connected { .. })
    }

    /// Writes one frame, connecting first if needed.
    ///
    /// The state lock is held only to pick the write half; the write itself
    /// runs under the writer's own lock.
    pub(crate) fn write_frame(&self, frame: &str) -> Result<(), TransportError> {
        let writer = {
            let mut state = self.lock();
            self.connect_locked(&mut state)?;
            match &*state {
                ConnectionState::Connected { writer: shared, .. } => Arc::clone(shared),
                ConnectionState::Disconnected => return Err(TransportError::Closed),
            }
        };
        lock_writer(&writer).write_frame(frame)
    }

    /// Hands the read half of the current channel to the caller.
    ///
    /// The very first claim connects implicitly. Once a channel has been
    /// opened, a later claim never reopens one: after an explicit
    /// disconnect the reader waits for a caller to reconnect.
    ///
    /// Returns `None` when no channel is open or its reader was already
    /// claimed.
    pub(crate) fn claim_reader(&self) -> Result<Option<ClaimedReader>, TransportError> {
        let mut state = self.lock();
        if matches!(*state, ConnectionState::Disconnected) && !self.ever_connected() {
            self.connect_locked(&mut state)?;
        }
        match &mut *state {
            ConnectionState::Connected {
                generation, reader, ..
            } => Ok(reader.take().map(|half| ClaimedReader {
                generation: *generation,
                reader: half,
            })),
            ConnectionState::Disconnected => Ok(None),
        }
    }

    fn ever_connected(&self) -> bool {
        *self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            > 0
    }

    /// Whether `generation` still names the open channel.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        matches!(
            *self.lock(),
            ConnectionState::Connected { generation: current, .. } if current == generation
        )
    }
}

fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, Box<dyn FrameWriter>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}
