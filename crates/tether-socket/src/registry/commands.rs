//! Pending-command registry.
//!
//! Commands move through two states. A submitter *reserves* its id before
//! writing the payload and *registers* the command once the write succeeds.
//! A response that overtakes registration is parked on the reservation and
//! delivered by [`CommandRegistry::register`], so no answer is lost in the
//! gap between write and registration.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{CommandError, SocketError};
use crate::ids::CommandId;

use super::REGISTRY_TARGET;

/// Terminal outcome of a command.
pub type CommandOutcome = Result<Value, CommandError>;

/// Caller-side handle for an in-flight command.
#[derive(Debug)]
pub struct CommandHandle {
    id: CommandId,
    method: String,
    outcome: Receiver<CommandOutcome>,
}

impl CommandHandle {
    /// Id assigned to the command.
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Method the command invoked.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Blocks until the command resolves.
    ///
    /// # Errors
    ///
    /// Returns the [`CommandError`] the command resolved with.
    pub fn wait(self) -> CommandOutcome {
        self.outcome.recv().unwrap_or(Err(CommandError::Abandoned))
    }

    /// Blocks until the command resolves or `timeout` passes.
    ///
    /// A timed-out command stays registered; a later response is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Timeout`] when the deadline passes, otherwise
    /// the error the command resolved with.
    pub fn wait_timeout(self, timeout: Duration) -> CommandOutcome {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(CommandError::Timeout {
                timeout_ms: timeout.as_millis(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(CommandError::Abandoned),
        }
    }

    /// Returns the outcome if the command has already resolved.
    #[must_use]
    pub fn try_outcome(&self) -> Option<CommandOutcome> {
        self.outcome.try_recv().ok()
    }
}

/// Registry-side half of a command.
#[derive(Debug)]
pub struct PendingCommand {
    id: CommandId,
    method: String,
    resolver: SyncSender<CommandOutcome>,
}

impl PendingCommand {
    /// Creates the registry half and the caller's handle.
    #[must_use]
    pub fn new(id: CommandId, method: impl Into<String>) -> (Self, CommandHandle) {
        let method = method.into();
        let (resolver, outcome) = mpsc::sync_channel(1);
        (
            Self {
                id,
                method: method.clone(),
                resolver,
            },
            CommandHandle {
                id,
                method,
                outcome,
            },
        )
    }

    /// Id of the command.
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Method of the command.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Delivers the terminal outcome. Consumes the command, so it resolves
    /// at most once.
    pub fn resolve(self, outcome: CommandOutcome) {
        if self.resolver.try_send(outcome).is_err() {
            debug!(
                target: REGISTRY_TARGET,
                command_id = %self.id,
                method = %self.method,
                "command outcome dropped: caller stopped waiting"
            );
        }
    }
}

enum Slot {
    /// Id handed out, payload not yet confirmed written.
    Reserved { parked: Option<CommandOutcome> },
    /// Payload written, awaiting a response.
    Pending(PendingCommand),
}

/// Concurrent map from [`CommandId`] to in-flight commands.
#[derive(Default)]
pub struct CommandRegistry {
    slots: Mutex<HashMap<CommandId, Slot>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CommandId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `id` as about to be written.
    pub fn reserve(&self, id: CommandId) {
        self.lock().insert(id, Slot::Reserved { parked: None });
    }

    /// Drops a reservation whose write failed, discarding anything parked.
    pub fn release(&self, id: CommandId) {
        let mut slots = self.lock();
        if matches!(slots.get(&id), Some(Slot::Reserved { .. })) {
            slots.remove(&id);
        }
    }

    /// Stores `command` until its response arrives.
    ///
    /// If a response was parked on the reservation it is delivered
    /// immediately and the command is not stored.
    pub fn register(&self, command: PendingCommand) {
        let id = command.id;
        let parked = {
            let mut slots = self.lock();
            match slots.remove(&id) {
                Some(Slot::Reserved {
                    parked: Some(outcome),
                }) => outcome,
                _ => {
                    slots.insert(id, Slot::Pending(command));
                    return;
                }
            }
        };
        debug!(
            target: REGISTRY_TARGET,
            command_id = %id,
            "delivering response that arrived before registration"
        );
        command.resolve(parked);
    }

    /// Removes the command for `id` and delivers `outcome` to it.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::NoSuchCommand`] when `id` is neither registered
    /// nor reserved.
    pub fn resolve(&self, id: CommandId, outcome: CommandOutcome) -> Result<(), SocketError> {
        let command = {
            let mut slots = self.lock();
            match slots.remove(&id) {
                Some(Slot::Pending(command)) => command,
                Some(Slot::Reserved { parked: None }) => {
                    slots.insert(
                        id,
                        Slot::Reserved {
                            parked: Some(outcome),
                        },
                    );
                    return Ok(());
                }
                Some(reserved) => {
                    slots.insert(id, reserved);
                    return Err(SocketError::NoSuchCommand { id });
                }
                None => return Err(SocketError::NoSuchCommand { id }),
            }
        };
        command.resolve(outcome);
        Ok(())
    }

    /// Resolves every registered command with `error` and clears the
    /// registry. Returns the number of commands failed.
    pub fn fail_all(&self, error: &CommandError) -> usize {
        let drained: Vec<Slot> = self.lock().drain().map(|(_, slot)| slot).collect();
        let mut failed = 0;
        for slot in drained {
            if let Slot::Pending(command) = slot {
                command.resolve(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Whether `id` is registered and awaiting a response.
    #[must_use]
    pub fn contains(&self, id: CommandId) -> bool {
        matches!(self.lock().get(&id), Some(Slot::Pending(_)))
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }

    /// Whether no commands are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
