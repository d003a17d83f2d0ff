//! Event listener registry and fan-out.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::SocketError;
use crate::protocol::Event;

use super::REGISTRY_TARGET;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

type Listener = dyn Fn(&Event) + Send + Sync;

/// A listener bound to one event method.
///
/// Clones share identity: removing any clone removes the registration.
#[derive(Clone)]
pub struct EventHandler {
    id: u64,
    method: String,
    listener: Arc<Listener>,
}

impl EventHandler {
    /// Wraps `listener` for events named `method`.
    #[must_use]
    pub fn new<F>(method: impl Into<String>, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            method: method.into(),
            listener: Arc::new(listener),
        }
    }

    /// Event method this handler listens for.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    fn invoke(&self, event: &Event) {
        (self.listener)(event);
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventHandler {}

impl fmt::Debug for EventHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventHandler")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Ordered listeners keyed by event method.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `handler` to the listeners for its method.
    pub fn add(&self, handler: EventHandler) {
        debug!(
            target: REGISTRY_TARGET,
            method = %handler.method,
            "adding event handler"
        );
        self.lock()
            .entry(handler.method.clone())
            .or_default()
            .push(handler);
    }

    /// Removes the first registration of `handler`, keeping the order of
    /// the rest.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::HandlerNotFound`] when `handler` is not
    /// registered.
    pub fn remove(&self, handler: &EventHandler) -> Result<(), SocketError> {
        let mut handlers = self.lock();
        let not_found = || SocketError::HandlerNotFound {
            method: handler.method.clone(),
        };
        let listeners = handlers.get_mut(&handler.method).ok_or_else(not_found)?;
        let position = listeners
            .iter()
            .position(|registered| registered == handler)
            .ok_or_else(not_found)?;
        listeners.remove(position);
        if listeners.is_empty() {
            handlers.remove(&handler.method);
        }
        debug!(
            target: REGISTRY_TARGET,
            method = %handler.method,
            "removed event handler"
        );
        Ok(())
    }

    /// Snapshot of the listeners for `method`, in registration order.
    #[must_use]
    pub fn listeners(&self, method: &str) -> Vec<EventHandler> {
        self.lock().get(method).cloned().unwrap_or_default()
    }

    /// Number of listeners registered for `method`.
    #[must_use]
    pub fn count(&self, method: &str) -> usize {
        self.lock().get(method).map_or(0, Vec::len)
    }
}

/// Invokes each listener with `event` in order.
///
/// A panicking listener does not prevent the ones after it from running;
/// each panic is returned as a [`SocketError::ListenerFailure`].
pub(crate) fn fan_out(listeners: &[EventHandler], event: &Event) -> Vec<SocketError> {
    listeners
        .iter()
        .enumerate()
        .filter_map(|(index, handler)| {
            catch_unwind(AssertUnwindSafe(|| handler.invoke(event)))
                .err()
                .map(|panic| SocketError::ListenerFailure {
                    method: event.method.clone(),
                    index,
                    message: panic_message(panic.as_ref()),
                })
        })
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("listener panicked")
    }
}
