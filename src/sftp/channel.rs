//! File-transfer channel
//!
//! [`FileChannel`] is the secondary channel a transport hands out for file
//! operations. [`SftpSession`] implements it on top of the SFTP subsystem of a
//! russh connection.

use std::path::Path;

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::error::SftpError;
use super::path_utils::join_remote_path;
use super::types::{FileInfo, FileType};
use crate::ssh::HandleController;

/// Readable remote file
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
/// Writable remote file
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait FileChannel: Send + Sync {
    /// Metadata for `path`, following symlinks.
    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError>;

    /// Directory entries sorted by name, without `.`/`..`. Entry types are
    /// reported without following symlinks.
    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError>;

    /// Create a single directory level.
    async fn mkdir(&self, path: &str) -> Result<(), SftpError>;

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SftpError>;

    /// Create or truncate `path` for writing.
    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError>;

    async fn close(&self);
}

/// SFTP Session wrapper
pub struct SftpSession {
    /// russh SFTP session
    sftp: RusshSftpSession,
    /// Session ID this SFTP is associated with
    session_id: String,
}

impl SftpSession {
    /// Open the SFTP subsystem through the handle owner task
    pub async fn open(
        handle_controller: &HandleController,
        session_id: String,
    ) -> Result<Self, SftpError> {
        info!("Opening SFTP subsystem for session {}", session_id);

        let channel = handle_controller
            .open_session_channel()
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::SubsystemNotAvailable(e.to_string()))?;

        info!("SFTP subsystem opened for session {}", session_id);

        Ok(Self { sftp, session_id })
    }

    fn map_sftp_error(&self, err: SftpErrorInner, path: &str) -> SftpError {
        let err_str = err.to_string();
        if err_str.contains("No such file") || err_str.contains("not found") {
            SftpError::FileNotFound(path.to_string())
        } else if err_str.contains("Permission denied") {
            SftpError::PermissionDenied(path.to_string())
        } else {
            SftpError::ProtocolError(format!("{}: {}", path, err_str))
        }
    }
}

fn file_type_of(metadata: &Metadata) -> FileType {
    if metadata.is_dir() {
        FileType::Directory
    } else if metadata.is_symlink() {
        FileType::Symlink
    } else if metadata.is_regular() {
        FileType::File
    } else {
        FileType::Unknown
    }
}

#[async_trait]
impl FileChannel for SftpSession {
    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError> {
        debug!("Getting file info: {}", path);

        let metadata = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| self.map_sftp_error(e, path))?;

        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(FileInfo {
            name,
            path: path.to_string(),
            file_type: file_type_of(&metadata),
            size: metadata.size.unwrap_or(0),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        debug!("Listing directory: {}", path);

        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| self.map_sftp_error(e, path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let metadata = entry.metadata();
            entries.push(FileInfo {
                path: join_remote_path(path, &name),
                name,
                file_type: file_type_of(&metadata),
                size: metadata.size.unwrap_or(0),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        info!("Creating directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| self.map_sftp_error(e, path))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SftpError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| self.map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| self.map_sftp_error(e, path))?;
        Ok(Box::new(file))
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close for session {} reported: {}", self.session_id, e);
        }
    }
}
