//! Client-side command and event dispatch for JSON remote-debugging
//! protocols.
//!
//! A [`Socket`] owns one persistent connection to a debugging endpoint. It
//! serializes outgoing commands, correlates each response with its pending
//! [`CommandHandle`] by id, and fans events out to the [`EventHandler`]s
//! registered for their method. A background dispatch loop drains the
//! connection while any number of threads submit commands and add or remove
//! listeners.
//!
//! The wire channel sits behind the [`Connector`] trait. The crate ships a
//! blocking WebSocket implementation, [`WebSocketConnector`], for `ws://`
//! endpoints.

mod connection;
mod dispatch;
mod error;
mod ids;
mod protocol;
mod registry;
mod socket;
pub mod telemetry;
mod transport;
mod websocket;

pub use dispatch::DispatchState;
pub use error::{CommandError, SocketError, TransportError};
pub use ids::{CommandId, CommandIdGenerator, SocketId};
pub use protocol::{CommandPayload, Envelope, Event, Inbound, ProtocolError, Response};
pub use registry::{
    CommandHandle, CommandOutcome, CommandRegistry, EventHandler, HandlerRegistry, PendingCommand,
};
pub use socket::Socket;
pub use transport::{Connection, Connector, FrameReader, FrameWriter, ReadOutcome};
pub use websocket::WebSocketConnector;

#[cfg(test)]
mod tests;
