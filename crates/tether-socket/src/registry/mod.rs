//! Registries shared between submitters and the dispatch loop.

mod commands;
mod handlers;

pub use commands::{CommandHandle, CommandOutcome, CommandRegistry, PendingCommand};
pub use handlers::{EventHandler, HandlerRegistry};
pub(crate) use handlers::fan_out;

/// Log target for registry bookkeeping.
pub(crate) const REGISTRY_TARGET: &str = "tether_socket::registry";
