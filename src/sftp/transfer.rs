//! Transfer Engine
//!
//! Single-file and recursive directory transfers over the file channel of a
//! [`ConnectionManager`]. The channel is fetched once per call; the copy loop
//! itself runs without the session lock. Failures are reported, never retried.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::channel::FileChannel;
use super::error::SftpError;
use super::path_utils::{join_remote_path, relative_to_remote, remote_ancestors};
use super::types::{
    FileType, TransferDirection, TransferProgress, TransferReport, TransferResult,
};
use crate::ssh::ConnectionManager;

/// Bytes moved per read/write cycle
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A single read or write stalling this long fails the file
const IO_TIMEOUT: Duration = Duration::from_secs(300);

/// Optional observer for per-chunk progress
pub type ProgressSender = mpsc::Sender<TransferProgress>;

/// Uploads and downloads files through a managed session
#[derive(Clone)]
pub struct TransferEngine {
    manager: Arc<ConnectionManager>,
}

impl TransferEngine {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Upload one local file to `remote`, replacing any existing file.
    pub async fn put(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        progress: Option<ProgressSender>,
    ) -> TransferResult {
        let local = local.as_ref();
        info!("Upload {} -> {}", local.display(), remote);

        let outcome = match self.manager.file_channel().await {
            Ok(channel) => upload_file(channel.as_ref(), local, remote, progress.as_ref()).await,
            Err(e) => Err(e),
        };
        single_result(outcome, &local.display().to_string())
    }

    /// Download one remote file to `local`, creating local parent directories.
    pub async fn get(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
        progress: Option<ProgressSender>,
    ) -> TransferResult {
        let local = local.as_ref();
        info!("Download {} -> {}", remote, local.display());

        let outcome = match self.manager.file_channel().await {
            Ok(channel) => {
                download_file(channel.as_ref(), remote, local, progress.as_ref()).await
            }
            Err(e) => Err(e),
        };
        single_result(outcome, remote)
    }

    /// Upload the tree under `local_root` into `remote_root`.
    ///
    /// Entries are visited depth-first in lexicographic order, directories
    /// before their contents. Symlinks are skipped.
    pub async fn put_dir(
        &self,
        local_root: impl AsRef<Path>,
        remote_root: &str,
        progress: Option<ProgressSender>,
    ) -> TransferReport {
        let local_root = local_root.as_ref();
        let root_label = local_root.display().to_string();
        info!("Upload tree {} -> {}", root_label, remote_root);

        let mut report = TransferReport::default();

        match tokio::fs::metadata(local_root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                report.record_failure(&root_label, SftpError::NotADirectory(root_label.clone()));
                return finish(report, &root_label);
            }
            Err(e) => {
                report.record_failure(&root_label, SftpError::io(&root_label, e));
                return finish(report, &root_label);
            }
        }

        let channel = match self.manager.file_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                report.record_failure(&root_label, e);
                return finish(report, &root_label);
            }
        };

        if let Err(e) = ensure_remote_dir_chain(channel.as_ref(), remote_root).await {
            report.record_failure(&root_label, e);
            return finish(report, &root_label);
        }

        let root = local_root.to_path_buf();
        let entries = match tokio::task::spawn_blocking(move || walk_local_tree(&root)).await {
            Ok(entries) => entries,
            Err(e) => {
                report.record_failure(&root_label, format!("directory walk aborted: {}", e));
                return finish(report, &root_label);
            }
        };

        for entry in entries {
            match entry {
                LocalEntry::Dir(path) => {
                    let remote = remote_path_for(local_root, &path, remote_root);
                    if let Err(e) = ensure_remote_dir(channel.as_ref(), &remote).await {
                        warn!("Cannot create remote directory {}: {}", remote, e);
                        report.record_failure(path.display().to_string(), e);
                    }
                }
                LocalEntry::File(path) => {
                    let remote = remote_path_for(local_root, &path, remote_root);
                    match upload_file(channel.as_ref(), &path, &remote, progress.as_ref()).await {
                        Ok(bytes) => report.record_success(bytes),
                        Err(e) => {
                            warn!("Upload of {} failed: {}", path.display(), e);
                            report.record_failure(path.display().to_string(), e);
                        }
                    }
                }
                LocalEntry::Skipped(path) => {
                    info!("Skipping {} (not a regular file or directory)", path.display());
                    report.record_skipped(path.display().to_string());
                }
                LocalEntry::Unreadable(path, error) => {
                    warn!("Cannot read {}: {}", path.display(), error);
                    report.record_failure(path.display().to_string(), error);
                }
            }
        }

        finish(report, &root_label)
    }

    /// Download the tree under `remote_root` into `local_root`.
    ///
    /// Same ordering and symlink policy as [`put_dir`](Self::put_dir).
    pub async fn get_dir(
        &self,
        remote_root: &str,
        local_root: impl AsRef<Path>,
        progress: Option<ProgressSender>,
    ) -> TransferReport {
        let local_root = local_root.as_ref();
        info!("Download tree {} -> {}", remote_root, local_root.display());

        let mut report = TransferReport::default();

        let channel = match self.manager.file_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                report.record_failure(remote_root, e);
                return finish(report, remote_root);
            }
        };

        match channel.stat(remote_root).await {
            Ok(info) if info.file_type == FileType::Directory => {}
            Ok(_) => {
                report.record_failure(remote_root, SftpError::NotADirectory(remote_root.into()));
                return finish(report, remote_root);
            }
            Err(e) => {
                report.record_failure(remote_root, e);
                return finish(report, remote_root);
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(local_root).await {
            report.record_failure(
                remote_root,
                SftpError::io(local_root.display().to_string(), e),
            );
            return finish(report, remote_root);
        }

        download_tree(
            channel.as_ref(),
            remote_root,
            local_root,
            progress.as_ref(),
            &mut report,
        )
        .await;

        finish(report, remote_root)
    }
}

fn single_result(outcome: Result<u64, SftpError>, source: &str) -> TransferResult {
    match outcome {
        Ok(bytes) => {
            info!("Transfer of {} complete: {} bytes", source, bytes);
            TransferResult::completed(bytes)
        }
        Err(e) => {
            warn!("Transfer of {} failed: {}", source, e);
            TransferResult::failed(e)
        }
    }
}

fn finish(report: TransferReport, root: &str) -> TransferReport {
    let report = report.finish();
    match &report.error {
        None => info!(
            "Tree transfer of {} complete: {} files, {} bytes",
            root, report.files_transferred, report.total_bytes
        ),
        Some(summary) => warn!("Tree transfer of {} incomplete: {}", root, summary),
    }
    report
}

async fn upload_file(
    channel: &dyn FileChannel,
    local: &Path,
    remote: &str,
    progress: Option<&ProgressSender>,
) -> Result<u64, SftpError> {
    let source = local.display().to_string();

    let meta = tokio::fs::metadata(local)
        .await
        .map_err(|e| SftpError::io(&source, e))?;
    if meta.is_dir() {
        return Err(SftpError::IsADirectory(source));
    }

    let mut reader = tokio::fs::File::open(local)
        .await
        .map_err(|e| SftpError::io(&source, e))?;
    let mut writer = channel.create(remote).await?;

    let chunk = Chunking {
        source: &source,
        destination: remote,
        direction: TransferDirection::Upload,
        total_bytes: meta.len(),
    };
    chunk.copy(&mut reader, &mut writer, progress).await
}

async fn download_file(
    channel: &dyn FileChannel,
    remote: &str,
    local: &Path,
    progress: Option<&ProgressSender>,
) -> Result<u64, SftpError> {
    let info = channel.stat(remote).await?;
    if info.file_type == FileType::Directory {
        return Err(SftpError::IsADirectory(remote.to_string()));
    }

    let destination = local.display().to_string();
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SftpError::io(parent.display().to_string(), e))?;
    }

    let mut reader = channel.open_read(remote).await?;
    let mut writer = tokio::fs::File::create(local)
        .await
        .map_err(|e| SftpError::io(&destination, e))?;

    let chunk = Chunking {
        source: remote,
        destination: &destination,
        direction: TransferDirection::Download,
        total_bytes: info.size,
    };
    chunk.copy(&mut reader, &mut writer, progress).await
}

async fn download_tree(
    channel: &dyn FileChannel,
    remote_dir: &str,
    local_dir: &Path,
    progress: Option<&ProgressSender>,
    report: &mut TransferReport,
) {
    let entries = match channel.read_dir(remote_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", remote_dir, e);
            report.record_failure(remote_dir, e);
            return;
        }
    };

    for entry in entries {
        let local_path = local_dir.join(&entry.name);
        match entry.file_type {
            FileType::Directory => match tokio::fs::create_dir_all(&local_path).await {
                Ok(()) => {
                    Box::pin(download_tree(
                        channel,
                        &entry.path,
                        &local_path,
                        progress,
                        report,
                    ))
                    .await
                }
                Err(e) => {
                    warn!("Cannot create {}: {}", local_path.display(), e);
                    report.record_failure(
                        entry.path.as_str(),
                        SftpError::io(local_path.display().to_string(), e),
                    );
                }
            },
            FileType::File => {
                match download_file(channel, &entry.path, &local_path, progress).await {
                    Ok(bytes) => report.record_success(bytes),
                    Err(e) => {
                        warn!("Download of {} failed: {}", entry.path, e);
                        report.record_failure(entry.path.as_str(), e);
                    }
                }
            }
            FileType::Symlink | FileType::Unknown => {
                info!("Skipping {} (not a regular file or directory)", entry.path);
                report.record_skipped(entry.path.as_str());
            }
        }
    }
}

/// Create `path` and any missing ancestors on the remote side.
async fn ensure_remote_dir_chain(channel: &dyn FileChannel, path: &str) -> Result<(), SftpError> {
    for dir in remote_ancestors(path) {
        ensure_remote_dir(channel, &dir).await?;
    }
    Ok(())
}

/// Reuse an existing remote directory or create it.
async fn ensure_remote_dir(channel: &dyn FileChannel, path: &str) -> Result<(), SftpError> {
    match channel.stat(path).await {
        Ok(info) if info.file_type == FileType::Directory => Ok(()),
        Ok(_) => Err(SftpError::NotADirectory(path.to_string())),
        Err(SftpError::FileNotFound(_)) => {
            debug!("Creating remote directory {}", path);
            channel.mkdir(path).await
        }
        Err(e) => Err(e),
    }
}

fn remote_path_for(local_root: &Path, path: &Path, remote_root: &str) -> String {
    let relative = path.strip_prefix(local_root).unwrap_or(path);
    join_remote_path(remote_root, &relative_to_remote(relative))
}

enum LocalEntry {
    Dir(PathBuf),
    File(PathBuf),
    Skipped(PathBuf),
    Unreadable(PathBuf, String),
}

/// Pre-order walk below `root`, siblings sorted by name. Blocking.
fn walk_local_tree(root: &Path) -> Vec<LocalEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .map(|entry| match entry {
            Ok(entry) => {
                let file_type = entry.file_type();
                let path = entry.into_path();
                if file_type.is_dir() {
                    LocalEntry::Dir(path)
                } else if file_type.is_file() {
                    LocalEntry::File(path)
                } else {
                    LocalEntry::Skipped(path)
                }
            }
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                LocalEntry::Unreadable(path, e.to_string())
            }
        })
        .collect()
}

/// Parameters of one file copy
struct Chunking<'a> {
    source: &'a str,
    destination: &'a str,
    direction: TransferDirection,
    total_bytes: u64,
}

impl Chunking<'_> {
    /// Copy in [`CHUNK_SIZE`] pieces, reporting progress after every chunk.
    /// An empty source reports once, at zero.
    async fn copy<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        progress: Option<&ProgressSender>,
    ) -> Result<u64, SftpError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            let bytes_read = with_io_timeout(self.source, reader.read(&mut buffer)).await?;
            if bytes_read == 0 {
                break; // EOF
            }

            with_io_timeout(self.destination, writer.write_all(&buffer[..bytes_read])).await?;
            transferred += bytes_read as u64;
            self.report(progress, transferred).await;
        }

        if transferred == 0 {
            self.report(progress, 0).await;
        }

        // Closes the remote handle / flushes the local file
        with_io_timeout(self.destination, writer.shutdown()).await?;

        debug!(
            "Copied {} -> {}: {} bytes",
            self.source, self.destination, transferred
        );
        Ok(transferred)
    }

    async fn report(&self, progress: Option<&ProgressSender>, transferred: u64) {
        if let Some(tx) = progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx
                .send(TransferProgress {
                    path: self.source.to_string(),
                    direction: self.direction,
                    transferred_bytes: transferred,
                    total_bytes: self.total_bytes,
                })
                .await;
        }
    }
}

async fn with_io_timeout<T>(
    path: &str,
    io: impl Future<Output = std::io::Result<T>>,
) -> Result<T, SftpError> {
    match tokio::time::timeout(IO_TIMEOUT, io).await {
        Ok(result) => result.map_err(|e| SftpError::io(path, e)),
        Err(_) => {
            warn!("I/O on {} stalled for {:?}", path, IO_TIMEOUT);
            Err(SftpError::ChannelError(format!(
                "I/O on {} stalled for {:?}; the connection may be dead",
                path, IO_TIMEOUT
            )))
        }
    }
}
