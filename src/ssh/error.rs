//! SSH Error types
//!
//! Every variant that can leave the crate names the host it concerns, so a
//! caller can tell "could not connect" apart from "connected, then failed".

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a failure.
///
/// The kind decides the recovery policy: only [`ErrorKind::Connection`] is
/// repaired automatically (one reconnect-and-retry inside command execution).
/// Transfer failures are reported per file and never trigger a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials or host key rejected. Fatal, never retried.
    Authentication,
    /// Host unreachable, DNS failure or handshake timeout.
    Network,
    /// The transport died mid-session.
    Connection,
    /// An operation exceeded its deadline.
    Timeout,
    /// Local or remote I/O failure while copying a file.
    Transfer,
    /// Bad construction inputs or unusable key material.
    Config,
    /// The caller asked for something that cannot be dispatched.
    InvalidRequest,
}

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Authentication failed for {username}@{host}: {reason}")]
    AuthenticationFailed {
        host: String,
        username: String,
        reason: String,
    },

    #[error("Host key verification failed for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("Cannot reach {host}: {reason}")]
    NetworkUnreachable { host: String, reason: String },

    #[error("Connection to {host} lost during {operation}: {reason}")]
    ConnectionLost {
        host: String,
        operation: String,
        reason: String,
    },

    #[error("{operation} on {host} timed out after {after:?}")]
    Timeout {
        host: String,
        operation: String,
        after: Duration,
    },

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl SshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SshError::AuthenticationFailed { .. } | SshError::HostKeyRejected { .. } => {
                ErrorKind::Authentication
            }
            SshError::NetworkUnreachable { .. } => ErrorKind::Network,
            SshError::ConnectionLost { .. } | SshError::ProtocolError(_) => ErrorKind::Connection,
            SshError::Timeout { .. } => ErrorKind::Timeout,
            SshError::KeyError(_) | SshError::ConfigError(_) => ErrorKind::Config,
            SshError::InvalidCommand(_) => ErrorKind::InvalidRequest,
        }
    }

    /// True when a reconnect may cure the failure.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// Host the error refers to, when known.
    pub fn host(&self) -> Option<&str> {
        match self {
            SshError::AuthenticationFailed { host, .. }
            | SshError::HostKeyRejected { host, .. }
            | SshError::NetworkUnreachable { host, .. }
            | SshError::ConnectionLost { host, .. }
            | SshError::Timeout { host, .. } => Some(host),
            _ => None,
        }
    }

    pub(crate) fn connection_lost(
        host: impl Into<String>,
        operation: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        SshError::ConnectionLost {
            host: host.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}
