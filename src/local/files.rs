//! Loopback file channel over a local directory root

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::sftp::path_utils::join_remote_path;
use crate::sftp::{FileChannel, FileInfo, FileType, RemoteReader, RemoteWriter, SftpError};

/// Serves `root` as a remote filesystem. Remote `/a/b` and `a/b` both map to
/// `root/a/b`; `..` is rejected.
pub struct LocalFileChannel {
    root: PathBuf,
    transport_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl LocalFileChannel {
    pub(crate) fn new(root: PathBuf, transport_closed: Arc<AtomicBool>) -> Self {
        Self {
            root,
            transport_closed,
            closed: AtomicBool::new(false),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SftpError> {
        if self.closed.load(Ordering::Acquire) || self.transport_closed.load(Ordering::Acquire) {
            return Err(SftpError::ChannelError(format!("channel closed ({})", path)));
        }

        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(SftpError::PermissionDenied(path.to_string()));
                }
            }
        }
        Ok(resolved)
    }
}

fn file_type_of(file_type: std::fs::FileType) -> FileType {
    if file_type.is_symlink() {
        FileType::Symlink
    } else if file_type.is_dir() {
        FileType::Directory
    } else if file_type.is_file() {
        FileType::File
    } else {
        FileType::Unknown
    }
}

#[async_trait]
impl FileChannel for LocalFileChannel {
    async fn stat(&self, path: &str) -> Result<FileInfo, SftpError> {
        let local = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&local)
            .await
            .map_err(|e| SftpError::io(path, e))?;

        Ok(FileInfo {
            name: local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string(),
            file_type: file_type_of(metadata.file_type()),
            size: metadata.len(),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        let local = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&local)
            .await
            .map_err(|e| SftpError::io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| SftpError::io(path, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // DirEntry::metadata does not follow symlinks
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| SftpError::io(join_remote_path(path, &name), e))?;
            entries.push(FileInfo {
                path: join_remote_path(path, &name),
                name,
                file_type: file_type_of(metadata.file_type()),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        let local = self.resolve(path)?;
        debug!("Local mkdir {}", local.display());
        tokio::fs::create_dir(&local)
            .await
            .map_err(|e| SftpError::io(path, e))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SftpError> {
        let local = self.resolve(path)?;
        let file = tokio::fs::File::open(&local)
            .await
            .map_err(|e| SftpError::io(path, e))?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, SftpError> {
        let local = self.resolve(path)?;
        let file = tokio::fs::File::create(&local)
            .await
            .map_err(|e| SftpError::io(path, e))?;
        Ok(Box::new(file))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
