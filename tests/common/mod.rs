//! Shared fixtures: a loopback session with fault injection.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use persistent_ssh::sftp::{FileChannel, FileInfo, RemoteReader, RemoteWriter, SftpError};
use persistent_ssh::ssh::{PingResult, RawOutput};
use persistent_ssh::{ConnectionManager, Connector, LocalConnector, SshConfig, SshError, Transport};

pub const HOST: &str = "example.com";

pub fn config() -> SshConfig {
    SshConfig::from_credentials(HOST, "ops", Some("secret".to_string()), None)
        .unwrap()
        .with_reconnect_delay(Duration::ZERO)
}

/// Wraps [`LocalConnector`] and counts or breaks things on demand.
pub struct FlakyConnector {
    inner: LocalConnector,
    opens: AtomicUsize,
    runs: Arc<AtomicUsize>,
    failing_runs: Arc<AtomicUsize>,
    faults: Mutex<Faults>,
    latest: Mutex<Option<Arc<dyn Transport>>>,
}

impl FlakyConnector {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalConnector::new(root),
            opens: AtomicUsize::new(0),
            runs: Arc::new(AtomicUsize::new(0)),
            failing_runs: Arc::new(AtomicUsize::new(0)),
            faults: Mutex::new(Faults::default()),
            latest: Mutex::new(None),
        })
    }

    /// Manager over this connector, not yet connected.
    pub fn manager(self: &Arc<Self>) -> Arc<ConnectionManager> {
        ConnectionManager::new(config(), self.clone()).unwrap()
    }

    /// Transports opened so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Commands dispatched so far, including injected failures.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// The next `n` dispatches fail at the transport level while liveness
    /// probes keep succeeding.
    pub fn fail_next_runs(&self, n: usize) {
        self.failing_runs.store(n, Ordering::SeqCst);
    }

    /// Files created through the channel whose path ends with `suffix` fail.
    pub fn fail_creates_ending_with(&self, suffix: &str) {
        self.faults.lock().create_suffix = Some(suffix.to_string());
    }

    /// Files opened for reading through the channel whose path ends with
    /// `suffix` fail.
    pub fn fail_reads_ending_with(&self, suffix: &str) {
        self.faults.lock().read_suffix = Some(suffix.to_string());
    }

    /// Kill the most recent transport behind the manager's back.
    pub async fn sever(&self) {
        let latest = self.latest.lock().clone();
        if let Some(transport) = latest {
            transport.close().await;
        }
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn open(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, SshError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.open(config).await?;
        let transport: Arc<dyn Transport> = Arc::new(FlakyTransport {
            inner,
            runs: self.runs.clone(),
            failing_runs: self.failing_runs.clone(),
            faults: self.faults.lock().clone(),
        });
        *self.latest.lock() = Some(transport.clone());
        Ok(transport)
    }
}

#[derive(Clone, Default)]
struct Faults {
    create_suffix: Option<String>,
    read_suffix: Option<String>,
}

impl Faults {
    fn any(&self) -> bool {
        self.create_suffix.is_some() || self.read_suffix.is_some()
    }
}

fn matches(suffix: &Option<String>, path: &str) -> bool {
    suffix.as_deref().is_some_and(|s| path.ends_with(s))
}

struct FlakyTransport {
    inner: Arc<dyn Transport>,
    runs: Arc<AtomicUsize>,
    failing_runs: Arc<AtomicUsize>,
    faults: Faults,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn run(&self, command: &str) -> Result<RawOutput, SshError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_runs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SshError::ConnectionLost {
                host: HOST.to_string(),
                operation: format!("exec `{}`", command),
                reason: "injected drop".to_string(),
            });
        }
        self.inner.run(command).await
    }

    async fn ping(&self) -> PingResult {
        self.inner.ping().await
    }

    async fn open_file_channel(&self) -> Result<Arc<dyn FileChannel>, SftpError> {
        let inner = self.inner.open_file_channel().await?;
        if !self.faults.any() {
            return Ok(inner);
        }
        Ok(Arc::new(FaultyChannel {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

struct FaultyChannel {
    inner: Arc<dyn FileChannel>,
    faults: Faults,
}

#[async_trait]
impl FileChannel for FaultyChannel {
    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError> {
        self.inner.stat(path).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        self.inner.read_dir(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        self.inner.mkdir(path).await
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SftpError> {
        if matches(&self.faults.read_suffix, path) {
            return Err(SftpError::PermissionDenied(path.to_string()));
        }
        self.inner.open_read(path).await
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError> {
        if matches(&self.faults.create_suffix, path) {
            return Err(SftpError::PermissionDenied(path.to_string()));
        }
        self.inner.create(path).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Rejects every login attempt.
#[derive(Default)]
pub struct RefusingConnector {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Connector for RefusingConnector {
    async fn open(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, SshError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SshError::AuthenticationFailed {
            host: config.host.clone(),
            username: config.username.clone(),
            reason: "password authentication rejected by server".to_string(),
        })
    }
}
