//! SSH Configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SshError;

/// SSH connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Connection (handshake + auth) timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout applied by `CommandExecutor::execute_default`
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Pause between tearing down a dead transport and the new handshake
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Protocol keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,

    /// Strict host key checking (default: false)
    /// - true: reject hosts missing from known_hosts
    /// - false: learn unknown hosts, still reject changed keys
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// known_hosts file to verify against (default: `~/.ssh/known_hosts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_file: Option<String>,
}

/// Authentication methods supported
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file (`~/` is expanded)
        key_path: String,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase,
        }
    }

    /// Short label for logs
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password { .. } => "password",
            AuthMethod::Key { .. } => "publickey",
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            AuthMethod::Key {
                key_path,
                passphrase,
            } => f
                .debug_struct("Key")
                .field("key_path", key_path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30_000
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_keepalive() -> u64 {
    30
}

impl SshConfig {
    /// Build a config from loose credentials.
    ///
    /// A key path wins over a password when both are given; having neither is
    /// an error.
    pub fn from_credentials(
        host: impl Into<String>,
        username: impl Into<String>,
        password: Option<String>,
        key_path: Option<String>,
    ) -> Result<Self, SshError> {
        let auth = match (key_path, password) {
            (Some(key_path), _) => AuthMethod::key(key_path, None),
            (None, Some(password)) => AuthMethod::password(password),
            (None, None) => {
                return Err(SshError::ConfigError(
                    "either a password or a key path is required".to_string(),
                ))
            }
        };

        let config = Self {
            host: host.into(),
            username: username.into(),
            auth,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Stored in whole milliseconds; sub-millisecond parts are dropped and
    /// anything past `u64::MAX` ms saturates.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = saturating_millis(delay);
        self
    }

    /// Same resolution as [`with_reconnect_delay`](Self::with_reconnect_delay).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::ConfigError("host must not be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::ConfigError(
                "username must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(SshError::ConfigError("port must not be 0".to_string()));
        }
        Ok(())
    }

    /// `host:port`, as used for address resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Expand a leading `~/` against the current user's home directory.
pub fn expand_key_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            auth: AuthMethod::Password {
                password: String::new(),
            },
            timeout_secs: default_timeout(),
            command_timeout_ms: default_command_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            keepalive_interval_secs: default_keepalive(),
            strict_host_key_checking: false,
            known_hosts_file: None,
        }
    }
}
