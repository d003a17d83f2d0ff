//! Message channel abstraction between the engine and the wire.
//!
//! A [`Connector`] dials an endpoint and yields a [`Connection`] split into
//! independent read and write halves. The dispatch loop owns the reader
//! outright; submitters share the writer behind its own write lock.

use url::Url;

use crate::error::TransportError;

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete text frame.
    Frame(String),
    /// The poll interval elapsed with no data.
    Idle,
}

/// Read half of a connection.
pub trait FrameReader: Send {
    /// Blocks until a frame arrives or the poll interval elapses.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the connection fails or closes.
    fn read_frame(&mut self) -> Result<ReadOutcome, TransportError>;
}

/// Write half of a connection.
pub trait FrameWriter: Send {
    /// Writes one complete text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the write fails.
    fn write_frame(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Closes the connection. The paired reader observes an error or
    /// end-of-stream afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the close handshake fails; the
    /// connection is unusable either way.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// An open connection split into halves.
pub struct Connection {
    /// Read half, handed to the dispatch loop.
    pub reader: Box<dyn FrameReader>,
    /// Write half, shared by command submitters.
    pub writer: Box<dyn FrameWriter>,
}

impl Connection {
    /// Pairs a reader and writer.
    #[must_use]
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to an endpoint.
pub trait Connector: Send + Sync {
    /// Dials `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the connection cannot be opened.
    fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError>;
}
