//! persistent-ssh - a managed, self-healing SSH session
//!
//! One [`ConnectionManager`] keeps a single authenticated session to a host
//! alive. [`CommandExecutor`] runs commands over it (one reconnect-and-retry on
//! transport failure) and [`TransferEngine`] moves files and directory trees
//! with per-chunk progress and per-file failure reporting.
//!
//! ```no_run
//! use std::sync::Arc;
//! use persistent_ssh::{CommandExecutor, ConnectionManager, RusshConnector, SshConfig};
//!
//! # async fn run() -> Result<(), persistent_ssh::SshError> {
//! let config = SshConfig::from_credentials("example.com", "ops", None, Some("~/.ssh/id_ed25519".into()))?;
//! let manager = ConnectionManager::open(config, Arc::new(RusshConnector)).await?;
//! let result = CommandExecutor::new(manager).execute_default("uptime").await?;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

pub mod local;
pub mod sftp;
pub mod ssh;

pub use local::LocalConnector;
pub use sftp::{
    FailedFile, SftpError, TransferDirection, TransferEngine, TransferProgress, TransferReport,
    TransferResult,
};
pub use ssh::{
    AuthMethod, CommandExecutor, CommandResult, ConnectionManager, Connector, ErrorKind,
    RusshConnector, SshConfig, SshError, Transport,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// `RUST_LOG` overrides the default `info` filter. Returns `false` when a
/// global subscriber was already installed.
pub fn init_logging() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
