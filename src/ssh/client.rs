//! SSH Client implementation using russh

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{known_hosts, HashAlg, PublicKey};
use russh::ChannelMsg;
use tracing::{debug, info, warn};

use super::config::{expand_key_path, AuthMethod, SshConfig};
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::transport::{Connector, PingResult, RawOutput, Transport};
use crate::sftp::{FileChannel, SftpError, SftpSession};

/// Performs the handshake and authentication for one connection attempt
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate, bounded by the configured connect timeout
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        let addr = self.config.address();
        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| self.unreachable(format!("failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| self.unreachable("no address found".to_string()))?;

        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, self.handshake(socket_addr))
            .await
            .map_err(|_| self.unreachable(format!("connection timed out after {:?}", timeout)))?
    }

    async fn handshake(&self, socket_addr: SocketAddr) -> Result<Handle<ClientHandler>, SshError> {
        let keepalive = self.config.keepalive_interval();
        let ssh_config = client::Config {
            // Liveness is probed explicitly before each use of the session.
            inactivity_timeout: None,
            keepalive_interval: (!keepalive.is_zero()).then_some(keepalive),
            keepalive_max: 3,
            ..Default::default()
        };

        let mut handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.strict_host_key_checking,
        );
        if let Some(path) = &self.config.known_hosts_file {
            handler = handler.with_known_hosts_file(expand_key_path(path));
        }

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| match e {
                SshError::ProtocolError(reason) => self.unreachable(reason),
                other => other,
            })?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| self.auth_failed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let path = expand_key_path(key_path);
                let key = russh::keys::load_secret_key(&path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(format!("{}: {}", path.display(), e)))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| self.auth_failed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(self.auth_failed(format!(
                "{} authentication rejected by server",
                self.config.auth.name()
            )));
        }

        info!(
            "SSH authentication successful for {}@{}",
            self.config.username, self.config.host
        );
        Ok(handle)
    }

    fn unreachable(&self, reason: String) -> SshError {
        SshError::NetworkUnreachable {
            host: self.config.host.clone(),
            reason,
        }
    }

    fn auth_failed(&self, reason: String) -> SshError {
        SshError::AuthenticationFailed {
            host: self.config.host.clone(),
            username: self.config.username.clone(),
            reason,
        }
    }
}

/// Client handler for russh callbacks
///
/// Verifies the server key against `~/.ssh/known_hosts`, or the file given
/// with [`with_known_hosts_file`](Self::with_known_hosts_file).
pub struct ClientHandler {
    /// Target host for key verification
    host: String,
    /// Target port
    port: u16,
    /// Strict host key checking mode
    /// - true: reject unknown/changed keys
    /// - false: learn unknown keys (still reject changed)
    strict: bool,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool) -> Self {
        Self {
            host,
            port,
            strict,
            known_hosts: None,
        }
    }

    pub fn with_known_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    fn check(&self, key: &PublicKey) -> Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::check_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &PublicKey) -> Result<(), russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::learn_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::learn_known_hosts(&self.host, self.port, key),
        }
    }

    fn rejected(&self, reason: String) -> SshError {
        SshError::HostKeyRejected {
            host: self.host.clone(),
            reason,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);

        match self.check(server_public_key) {
            Ok(true) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            Ok(false) if self.strict => {
                warn!(
                    "Unknown host key for {}:{} (fingerprint: {}). Strict mode enabled, rejecting.",
                    self.host, self.port, fingerprint
                );
                Err(self.rejected(format!(
                    "unknown host {}:{} (fingerprint {}); add it to known_hosts or disable strict mode",
                    self.host, self.port, fingerprint
                )))
            }
            Ok(false) => {
                info!(
                    "New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self.learn(server_public_key) {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                warn!(
                    "HOST KEY CHANGED for {}:{} (known_hosts line {}), got {}",
                    self.host, self.port, line, fingerprint
                );
                Err(self.rejected(format!(
                    "key for {}:{} differs from known_hosts line {} (got {}); \
                     remove the stale entry if the change is legitimate",
                    self.host, self.port, line, fingerprint
                )))
            }
            Err(e) if self.strict => Err(self.rejected(format!("cannot read known_hosts: {}", e))),
            Err(e) => {
                warn!("Cannot read known_hosts ({}), accepting {}", e, fingerprint);
                Ok(true)
            }
        }
    }
}

/// Production [`Connector`]: russh handshake + handle owner task
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

#[async_trait]
impl Connector for RusshConnector {
    async fn open(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, SshError> {
        let handle = SshClient::new(config.clone()).connect().await?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let controller = spawn_handle_owner_task(handle, session_id.clone());
        Ok(Arc::new(RusshTransport {
            controller,
            host: config.host.clone(),
            session_id,
        }))
    }
}

/// A russh connection, driven through its [`HandleController`]
pub struct RusshTransport {
    controller: HandleController,
    host: String,
    session_id: String,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn run(&self, command: &str) -> Result<RawOutput, SshError> {
        let operation = || format!("exec `{}`", command);

        let mut channel = self
            .controller
            .open_session_channel()
            .await
            .map_err(|e| SshError::connection_lost(&self.host, operation(), e))?;

        debug!("Exec on session {}: {}", self.session_id, command);

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::connection_lost(&self.host, operation(), e))?;

        let mut output = RawOutput::default();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    // ext=1 is stderr
                    output.stderr.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.exit_status = Some(exit_status);
                }
                // The exit status may trail EOF, so only Close ends the read.
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        if output.exit_status.is_none() && self.controller.ping().await != PingResult::Ok {
            return Err(SshError::connection_lost(
                &self.host,
                operation(),
                "transport closed before the command finished",
            ));
        }

        Ok(output)
    }

    async fn ping(&self) -> PingResult {
        self.controller.ping().await
    }

    async fn open_file_channel(&self) -> Result<Arc<dyn FileChannel>, SftpError> {
        let session = SftpSession::open(&self.controller, self.session_id.clone()).await?;
        Ok(Arc::new(session))
    }

    async fn close(&self) {
        self.controller.disconnect().await;
    }
}
