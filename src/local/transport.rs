//! Loopback transport: commands run through `sh -c` on this machine

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::files::LocalFileChannel;
use crate::sftp::{FileChannel, SftpError};
use crate::ssh::{Connector, PingResult, RawOutput, SshConfig, SshError, Transport};

/// Shell used to interpret commands
const SHELL: &str = "/bin/sh";

/// Connects to the local machine, serving `root` as the remote filesystem.
///
/// Credentials in the config are not checked. Commands run with `root` as
/// their working directory.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn open(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, SshError> {
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SshError::NetworkUnreachable {
                host: config.host.clone(),
                reason: format!("local root {} is not a directory", self.root.display()),
            });
        }

        info!(
            "Local transport for {} rooted at {}",
            config.host,
            self.root.display()
        );
        Ok(Arc::new(LocalTransport {
            root: self.root.clone(),
            host: config.host.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

pub struct LocalTransport {
    root: PathBuf,
    host: String,
    /// Shared with every channel this transport opened
    closed: Arc<AtomicBool>,
}

impl LocalTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn run(&self, command: &str) -> Result<RawOutput, SshError> {
        let operation = || format!("exec `{}`", command);
        if self.is_closed() {
            return Err(SshError::connection_lost(
                &self.host,
                operation(),
                "transport closed",
            ));
        }

        debug!("Local exec: {}", command);
        let output = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SshError::connection_lost(&self.host, operation(), e))?;

        Ok(RawOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            // None when killed by a signal
            exit_status: output.status.code().map(|code| code as u32),
        })
    }

    async fn ping(&self) -> PingResult {
        if self.is_closed() {
            PingResult::IoError
        } else {
            PingResult::Ok
        }
    }

    async fn open_file_channel(&self) -> Result<Arc<dyn FileChannel>, SftpError> {
        if self.is_closed() {
            return Err(SftpError::ChannelError("transport closed".to_string()));
        }
        Ok(Arc::new(LocalFileChannel::new(
            self.root.clone(),
            self.closed.clone(),
        )))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Local transport for {} closed", self.host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SshConfig {
        SshConfig::from_credentials("example.com", "ops", Some("pw".into()), None).unwrap()
    }

    #[tokio::test]
    async fn runs_in_root_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "here").unwrap();
        let transport = LocalConnector::new(dir.path()).open(&config()).await.unwrap();

        let out = transport.run("cat marker; exit 4").await.unwrap();
        assert_eq!(out.stdout, b"here");
        assert_eq!(out.exit_status, Some(4));
    }

    #[tokio::test]
    async fn signal_death_has_no_status() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalConnector::new(dir.path()).open(&config()).await.unwrap();

        let out = transport.run("kill -9 $$").await.unwrap();
        assert_eq!(out.exit_status, None);
    }

    #[tokio::test]
    async fn closed_transport_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalConnector::new(dir.path()).open(&config()).await.unwrap();
        let channel = transport.open_file_channel().await.unwrap();

        transport.close().await;
        transport.close().await;

        assert_eq!(transport.ping().await, PingResult::IoError);
        assert!(transport.run("true").await.unwrap_err().is_retryable());
        assert!(channel.stat("").await.is_err());
        assert!(transport.open_file_channel().await.is_err());
    }

    #[tokio::test]
    async fn missing_root_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let connector = LocalConnector::new(dir.path().join("nope"));
        let err = connector.open(&config()).await.err().unwrap();
        assert_eq!(err.kind(), crate::ssh::ErrorKind::Network);
    }
}
