//! SSH module - connection lifecycle and command execution
//!
//! This module provides the session layer on top of the russh library.
//!
//! # Features
//! - One persistent, lazily (re)established session per [`ConnectionManager`]
//! - Liveness probing and reconnect with a configurable delay
//! - Command execution with a deadline and a single retry after reconnect
//! - Host key verification via ~/.ssh/known_hosts
//! - Pluggable providers through [`Connector`] / [`Transport`]

mod client;
mod config;
mod error;
mod exec;
mod handle_owner;
mod manager;
mod transport;

pub use client::{ClientHandler, RusshConnector, RusshTransport, SshClient};
pub use config::{expand_key_path, AuthMethod, SshConfig};
pub use error::{ErrorKind, SshError};
pub use exec::{CommandExecutor, CommandResult, NO_EXIT_STATUS};
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use manager::{ConnectionManager, SessionGuard};
pub use transport::{Connector, PingResult, RawOutput, Transport};
