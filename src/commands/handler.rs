//! Command Dispatcher
//!
//! Executes parsed commands against the store and builds replies.
//!
//! ## Supported Commands
//!
//! - `PING` - replies `PONG`
//! - `ECHO message [message ...]` - replies with the messages
//! - `SET key value [PX milliseconds]` - stores a value, replies `OK`
//! - `GET key` - replies with the value, or null if missing or expired
//! - `INFO` - replies `role:master`
//!
//! ## Errors
//!
//! Bad arguments produce an error reply and the connection carries on.
//! An unknown command is returned as an `Err` so the connection handler
//! can close the connection without replying.

use crate::commands::command::{Command, CommandError};
use crate::protocol::{Dialect, Frame, Reply};
use crate::storage::Store;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Replication role reported by INFO
const INFO_REPORT: &[u8] = b"role:master";

/// Dispatches requests to the store. Cheap to clone; one per connection.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<Store>,
    dialect: Dialect,
}

impl CommandHandler {
    /// Creates a command handler using the legacy reply dialect.
    pub fn new(storage: Arc<Store>) -> Self {
        Self::with_dialect(storage, Dialect::default())
    }

    pub fn with_dialect(storage: Arc<Store>, dialect: Dialect) -> Self {
        Self { storage, dialect }
    }

    /// Reply dialect the connection should encode with.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Executes one request frame.
    ///
    /// Returns `Err` only for errors that end the connection.
    pub fn execute(&self, frame: &Frame) -> Result<Reply, CommandError> {
        match Command::parse(frame) {
            Ok(command) => {
                debug!(command = command.name(), "Executing command");
                Ok(self.apply(command))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Rejected command");
                Ok(Reply::error(e.to_string()))
            }
        }
    }

    /// Runs a validated command.
    pub fn apply(&self, command: Command) -> Reply {
        match command {
            Command::Ping => Reply::pong(),
            Command::Echo(messages) => Reply::sequence(messages),
            Command::Set { key, value, ttl } => {
                self.storage.set(key, value, ttl);
                Reply::ok()
            }
            Command::Get { key } => match self.storage.get(&key) {
                Some(value) => Reply::bulk(value),
                None => Reply::null(),
            },
            Command::Info => Reply::bulk(Bytes::from_static(INFO_REPORT)),
        }
    }
}
