//! Connection Manager
//!
//! Owns the single session to one host: the live transport, the lazily opened
//! file channel, and a generation counter bumped on every transport swap.
//!
//! # Locking
//!
//! Two locks, always taken in this order:
//! 1. `op_lock` (tokio `Mutex`): held for the whole of connect / reconnect /
//!    close and for each command's critical section. Handed out as a
//!    [`SessionGuard`].
//! 2. `slot` (parking_lot `RwLock`): short synchronous access to the current
//!    transport and channel. Never held across an `.await`.
//!
//! `is_connected` only touches the slot, so it answers while a command runs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::config::SshConfig;
use super::error::SshError;
use super::transport::{Connector, PingResult, Transport};
use crate::sftp::{FileChannel, SftpError};

#[derive(Default)]
struct Slot {
    transport: Option<Arc<dyn Transport>>,
    /// Bound to `transport`; dropped whenever it is replaced
    file_channel: Option<Arc<dyn FileChannel>>,
    generation: u64,
}

/// Manages one persistent session to one host.
///
/// Share it as `Arc<ConnectionManager>` between a
/// [`CommandExecutor`](super::CommandExecutor) and a
/// [`TransferEngine`](crate::sftp::TransferEngine).
pub struct ConnectionManager {
    config: SshConfig,
    connector: Arc<dyn Connector>,
    slot: RwLock<Slot>,
    op_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Create a manager without connecting. The first operation connects.
    pub fn new(config: SshConfig, connector: Arc<dyn Connector>) -> Result<Arc<Self>, SshError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            connector,
            slot: RwLock::new(Slot::default()),
            op_lock: Mutex::new(()),
        }))
    }

    /// Create a manager and establish the session right away.
    pub async fn open(
        config: SshConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, SshError> {
        let manager = Self::new(config, connector)?;
        manager.connect().await?;
        Ok(manager)
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Number of transports installed so far. Changes on every (re)connect.
    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    /// Take exclusive access to the session.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            manager: self,
            _guard: self.op_lock.lock().await,
        }
    }

    /// Connect unless a live session already exists.
    pub async fn connect(&self) -> Result<(), SshError> {
        self.lock().await.connect().await
    }

    /// Drop the current transport (if any), wait the reconnect delay, and
    /// connect again.
    pub async fn reconnect(&self) -> Result<(), SshError> {
        self.lock().await.reconnect().await
    }

    /// Release the transport and the file channel. Safe to call repeatedly.
    pub async fn close(&self) {
        self.lock().await.close().await
    }

    /// Liveness probe. Never fails; any transport problem reads as `false`.
    pub async fn is_connected(&self) -> bool {
        let transport = self.slot.read().transport.clone();
        match transport {
            Some(transport) => transport.ping().await == PingResult::Ok,
            None => false,
        }
    }

    /// File channel bound to a live transport, opened on first use.
    pub async fn file_channel(&self) -> Result<Arc<dyn FileChannel>, SftpError> {
        let mut session = self.lock().await;
        session.ensure_connected().await?;
        session.file_channel().await
    }

    fn install(&self, transport: Arc<dyn Transport>) -> u64 {
        let mut slot = self.slot.write();
        slot.transport = Some(transport);
        slot.file_channel = None;
        slot.generation += 1;
        slot.generation
    }

    fn take(&self) -> (Option<Arc<dyn Transport>>, Option<Arc<dyn FileChannel>>) {
        let mut slot = self.slot.write();
        (slot.transport.take(), slot.file_channel.take())
    }
}

/// Exclusive access to a [`ConnectionManager`]'s session.
///
/// Everything that mutates the session goes through a guard; dropping it lets
/// the next queued operation in.
pub struct SessionGuard<'a> {
    manager: &'a ConnectionManager,
    _guard: MutexGuard<'a, ()>,
}

impl SessionGuard<'_> {
    pub fn host(&self) -> &str {
        self.manager.host()
    }

    pub async fn connect(&mut self) -> Result<(), SshError> {
        if self.probe().await {
            debug!("Session to {} already alive", self.host());
            return Ok(());
        }
        self.teardown().await;
        self.establish().await
    }

    pub async fn reconnect(&mut self) -> Result<(), SshError> {
        info!("Reconnecting to {}", self.host());
        self.teardown().await;

        let delay = self.manager.config.reconnect_delay();
        if delay > Duration::ZERO {
            debug!("Waiting {:?} before reconnecting to {}", delay, self.host());
            tokio::time::sleep(delay).await;
        }

        self.establish().await
    }

    pub async fn close(&mut self) {
        if self.teardown().await {
            info!("Session to {} closed", self.host());
        }
    }

    /// Make sure a live transport is installed, reconnecting when the current
    /// one fails its probe.
    pub async fn ensure_connected(&mut self) -> Result<(), SshError> {
        let has_transport = self.manager.slot.read().transport.is_some();
        if !has_transport {
            return self.establish().await;
        }
        if self.probe().await {
            return Ok(());
        }
        warn!("Session to {} failed its liveness probe", self.host());
        self.reconnect().await
    }

    /// The installed transport, or `ConnectionLost` when there is none.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, SshError> {
        self.manager.slot.read().transport.clone().ok_or_else(|| {
            SshError::connection_lost(self.host(), "dispatch", "no transport installed")
        })
    }

    /// Cached file channel for the current transport, opening one if needed.
    pub async fn file_channel(&mut self) -> Result<Arc<dyn FileChannel>, SftpError> {
        let cached = self.manager.slot.read().file_channel.clone();
        if let Some(channel) = cached {
            return Ok(channel);
        }

        let transport = self.transport()?;
        let channel = transport.open_file_channel().await?;

        // The op lock is held, so the transport cannot have been swapped.
        let mut slot = self.manager.slot.write();
        slot.file_channel = Some(channel.clone());
        debug!(
            "File channel opened for {} (generation {})",
            self.manager.config.host, slot.generation
        );
        Ok(channel)
    }

    async fn probe(&self) -> bool {
        self.manager.is_connected().await
    }

    async fn establish(&mut self) -> Result<(), SshError> {
        let config = &self.manager.config;
        info!(
            "Connecting to {}@{} ({} auth)",
            config.username,
            config.address(),
            config.auth.name()
        );

        let transport = match self.manager.connector.open(config).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Connection to {} failed: {}", config.host, e);
                return Err(e);
            }
        };

        let generation = self.manager.install(transport);
        info!(
            "Session to {} established (generation {})",
            config.host, generation
        );
        Ok(())
    }

    /// Returns whether anything was torn down.
    async fn teardown(&mut self) -> bool {
        let (transport, channel) = self.manager.take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        match transport {
            Some(transport) => {
                transport.close().await;
                true
            }
            None => false,
        }
    }
}
