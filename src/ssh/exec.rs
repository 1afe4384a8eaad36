//! Command execution over a managed session
//!
//! One command per call, run under the session lock. A transport failure gets
//! exactly one reconnect and one retry; a non-zero exit status is just a result.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::manager::{ConnectionManager, SessionGuard};
use super::transport::RawOutput;

/// Exit status reported when the remote side never sent one
pub const NO_EXIT_STATUS: i32 = -1;

/// Stand-in deadline for timeouts too large to represent (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Output of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// stdout, lossily decoded as UTF-8
    pub output: String,
    /// stderr, lossily decoded as UTF-8
    pub error: String,
    pub exit_status: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

impl From<RawOutput> for CommandResult {
    fn from(raw: RawOutput) -> Self {
        Self {
            output: String::from_utf8_lossy(&raw.stdout).into_owned(),
            error: String::from_utf8_lossy(&raw.stderr).into_owned(),
            exit_status: raw
                .exit_status
                .map(|status| status as i32)
                .unwrap_or(NO_EXIT_STATUS),
        }
    }
}

/// Runs commands on the session held by a [`ConnectionManager`]
#[derive(Clone)]
pub struct CommandExecutor {
    manager: Arc<ConnectionManager>,
}

impl CommandExecutor {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// [`execute`](Self::execute) with the configured command timeout.
    pub async fn execute_default(&self, command: &str) -> Result<CommandResult, SshError> {
        let timeout = self.manager.config().command_timeout();
        self.execute(command, timeout).await
    }

    /// Run `command` and wait for it to finish.
    ///
    /// `timeout` is a deadline over every dispatch attempt of this call. The
    /// reconnect handshake in between is bounded by the connect timeout.
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, SshError> {
        if command.trim().is_empty() {
            return Err(SshError::InvalidCommand("command is empty".to_string()));
        }

        let mut session = self.manager.lock().await;
        session.ensure_connected().await?;

        let deadline = deadline_after(timeout);
        let err = match dispatch(&session, command, deadline, timeout).await {
            Ok(raw) => return Ok(raw.into()),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        warn!(
            "Command on {} lost its transport ({}), reconnecting once",
            session.host(),
            err
        );
        session.reconnect().await?;

        match dispatch(&session, command, deadline, timeout).await {
            Ok(raw) => {
                info!("Command on {} succeeded after reconnect", session.host());
                Ok(raw.into())
            }
            Err(e) if e.is_retryable() => Err(SshError::connection_lost(
                session.host(),
                format!("exec `{}` (after reconnect)", command),
                cause_of(&e),
            )),
            Err(e) => Err(e),
        }
    }
}

async fn dispatch(
    session: &SessionGuard<'_>,
    command: &str,
    deadline: Instant,
    timeout: Duration,
) -> Result<RawOutput, SshError> {
    let transport = session.transport()?;
    debug!("Dispatching to {}: {}", session.host(), command);

    match tokio::time::timeout_at(deadline, transport.run(command)).await {
        Ok(result) => result,
        Err(_) => {
            // The transport is now suspect; the next liveness probe decides.
            warn!(
                "Command on {} timed out after {:?}: {}",
                session.host(),
                timeout,
                command
            );
            Err(SshError::Timeout {
                host: session.host().to_string(),
                operation: format!("exec `{}`", command),
                after: timeout,
            })
        }
    }
}

/// Deadline `timeout` from now; an unrepresentable one means "no limit".
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn cause_of(err: &SshError) -> String {
    match err {
        SshError::ConnectionLost { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalConnector;
    use crate::ssh::SshConfig;

    #[test]
    fn output_is_decoded_lossily() {
        let result = CommandResult::from(RawOutput {
            stdout: b"ok\xff\n".to_vec(),
            stderr: Vec::new(),
            exit_status: Some(0),
        });
        assert_eq!(result.output, "ok\u{FFFD}\n");
        assert!(result.success());
    }

    #[test]
    fn missing_exit_status_reads_as_minus_one() {
        let result = CommandResult::from(RawOutput::default());
        assert_eq!(result.exit_status, NO_EXIT_STATUS);
        assert!(!result.success());

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "output": "", "error": "", "exit_status": -1 })
        );
    }

    #[test]
    fn unbounded_timeout_does_not_overflow() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now + Duration::from_secs(86_400));
        let bounded = deadline_after(Duration::from_secs(1));
        assert!(bounded <= Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn empty_command_is_rejected_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            SshConfig::from_credentials("example.com", "ops", Some("pw".into()), None).unwrap();
        let manager =
            ConnectionManager::new(config, Arc::new(LocalConnector::new(dir.path()))).unwrap();
        let executor = CommandExecutor::new(manager.clone());

        let err = executor
            .execute("   ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::InvalidCommand(_)));
        assert_eq!(manager.generation(), 0);
    }

    #[tokio::test]
    async fn stderr_and_status_are_captured() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            SshConfig::from_credentials("example.com", "ops", Some("pw".into()), None).unwrap();
        let manager =
            ConnectionManager::new(config, Arc::new(LocalConnector::new(dir.path()))).unwrap();
        let executor = CommandExecutor::new(manager);

        let result = executor
            .execute_default("printf out; printf err >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(result.output, "out");
        assert_eq!(result.error, "err");
        assert_eq!(result.exit_status, 3);
    }
}
