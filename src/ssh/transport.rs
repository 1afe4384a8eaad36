//! Transport provider seam
//!
//! The connection manager never talks to a wire protocol directly. It asks a
//! [`Connector`] for an authenticated [`Transport`], and everything after that
//! (command dispatch, keepalive probes, opening the file-transfer channel) goes
//! through the trait. `RusshConnector` is the production provider;
//! `local::LocalConnector` is a loopback provider.

use std::sync::Arc;

use async_trait::async_trait;

use super::config::SshConfig;
use super::error::SshError;
use crate::sftp::{FileChannel, SftpError};

/// Result of a liveness probe, distinguishing the failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingResult {
    /// Connection answered
    Ok,
    /// No answer in time (network latency or a wedged peer)
    Timeout,
    /// The transport is gone
    IoError,
}

/// Raw output of one remote command, before decoding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the remote side never reported a status (killed by signal,
    /// channel closed early)
    pub exit_status: Option<u32>,
}

/// Establishes authenticated transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport to `config.host`.
    ///
    /// Must fail with `AuthenticationFailed`/`HostKeyRejected` when the peer
    /// rejects us and `NetworkUnreachable` when it cannot be reached.
    async fn open(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, SshError>;
}

/// A live, authenticated connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` to completion, capturing both streams and the exit status.
    ///
    /// A command that runs and exits non-zero is `Ok`. `Err` is reserved for
    /// the transport failing underneath the command.
    async fn run(&self, command: &str) -> Result<RawOutput, SshError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> PingResult;

    /// Open a new file-transfer channel bound to this transport.
    async fn open_file_channel(&self) -> Result<Arc<dyn FileChannel>, SftpError>;

    /// Tear the transport down. Errors are swallowed; calling twice is harmless.
    async fn close(&self);
}
