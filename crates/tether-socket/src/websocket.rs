//! Blocking WebSocket transport over plain TCP.
//!
//! Both halves share the handshaken [`WebSocket`] behind one mutex, so the
//! control replies `tungstenite` writes while reading (Pong, Close) never
//! interleave with command frames. The reader holds the lock for a single
//! bounded read; the read timeout doubles as the dispatch loop's poll
//! interval.

use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_config::ConnectionSettings;
use tracing::debug;
use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::WebSocket;
use tungstenite::{Message, client};
use url::Url;

use crate::error::TransportError;
use crate::transport::{Connection, Connector, FrameReader, FrameWriter, ReadOutcome};

/// Log target for transport operations.
pub(crate) const TRANSPORT_TARGET: &str = "tether_socket::transport";

type SharedSocket = Arc<Mutex<WebSocket<TcpStream>>>;

fn lock(socket: &SharedSocket) -> MutexGuard<'_, WebSocket<TcpStream>> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dials `ws://` endpoints with `tungstenite`.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Builds a connector from connection settings.
    #[must_use]
    pub const fn new(settings: &ConnectionSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            connect_timeout: settings.connect_timeout(),
        }
    }

    fn open_tcp(&self, endpoint: &Url) -> Result<TcpStream, TransportError> {
        let addresses = resolve(endpoint)?;
        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        %address,
                        %error,
                        "tcp connect attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }
        Err(TransportError::Io(last_error.unwrap_or_else(|| {
            io::Error::new(ErrorKind::AddrNotAvailable, "endpoint resolved to no addresses")
        })))
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError> {
        let stream = self.open_tcp(endpoint)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.connect_timeout))?;

        let (socket, response) = match client(endpoint.as_str(), stream) {
            Ok(pair) => pair,
            Err(HandshakeError::Failure(error)) => return Err(error.into()),
            Err(HandshakeError::Interrupted(_)) => return Err(TransportError::HandshakeInterrupted),
        };
        debug!(
            target: TRANSPORT_TARGET,
            endpoint = %endpoint,
            status = %response.status(),
            "websocket handshake complete"
        );

        socket.get_ref().set_read_timeout(Some(self.poll_interval))?;
        socket.get_ref().set_write_timeout(Some(self.connect_timeout))?;
        let shared = Arc::new(Mutex::new(socket));

        Ok(Connection::new(
            WebSocketReader {
                socket: Arc::clone(&shared),
            },
            WebSocketWriter { socket: shared },
        ))
    }
}

fn resolve(endpoint: &Url) -> Result<Vec<SocketAddr>, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_owned(),
    };
    let host = endpoint.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = endpoint
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;
    Ok((host, port).to_socket_addrs()?.collect())
}

struct WebSocketReader {
    socket: SharedSocket,
}

impl FrameReader for WebSocketReader {
    fn read_frame(&mut self) -> Result<ReadOutcome, TransportError> {
        let message = lock(&self.socket).read();
        match message {
            Ok(Message::Text(text)) => Ok(ReadOutcome::Frame(text)),
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes)
                .map(ReadOutcome::Frame)
                .map_err(|error| TransportError::Io(io::Error::new(ErrorKind::InvalidData, error))),
            Ok(Message::Close(frame)) => {
                debug!(target: TRANSPORT_TARGET, ?frame, "remote sent close frame");
                Err(TransportError::Closed)
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(ReadOutcome::Idle),
            Err(tungstenite::Error::Io(error)) if is_timeout(&error) => Ok(ReadOutcome::Idle),
            Err(error) => Err(error.into()),
        }
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

struct WebSocketWriter {
    socket: SharedSocket,
}

impl FrameWriter for WebSocketWriter {
    fn write_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        lock(&self.socket).send(Message::Text(frame.to_owned()))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut socket = lock(&self.socket);
        let closed = match socket.close(None) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(error) => Err(TransportError::from(error)),
        };
        // Later reads fail fast instead of waiting for the close reply.
        let shutdown = socket.get_ref().shutdown(Shutdown::Both);
        closed?;
        match shutdown {
            Err(error) if error.kind() != ErrorKind::NotConnected => Err(error.into()),
            _ => Ok(()),
        }
    }
}
