//! SFTP / transfer error types

use thiserror::Error;

use crate::ssh::{ErrorKind, SshError};

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("IO error on {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SFTP protocol error: {0}")]
    ProtocolError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("Transfer channel unavailable: {0}")]
    Session(#[from] SshError),
}

impl SftpError {
    /// Map an I/O error on `path`, keeping the common cases distinguishable.
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => SftpError::FileNotFound(path),
            std::io::ErrorKind::PermissionDenied => SftpError::PermissionDenied(path),
            _ => SftpError::IoError { path, source: err },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            // The session could not be brought up at all; report the real cause.
            SftpError::Session(inner) => inner.kind(),
            _ => ErrorKind::Transfer,
        }
    }
}
