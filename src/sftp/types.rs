//! SFTP data types

use serde::{Deserialize, Serialize};

/// File entry information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name (not full path)
    pub name: String,
    /// Full path
    pub path: String,
    /// File type, as reported without following symlinks
    pub file_type: FileType,
    /// File size in bytes
    pub size: u64,
}

/// File type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Progress of the file currently being copied.
///
/// Emitted after every chunk; `transferred_bytes` never decreases for a given
/// `path`. Directory transfers emit one such stream per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Source path of the file being copied
    pub path: String,
    pub direction: TransferDirection,
    /// Bytes copied so far for this file
    pub transferred_bytes: u64,
    /// Size of this file
    pub total_bytes: u64,
}

/// Outcome of a single-file `put` / `get`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    pub error: Option<String>,
    pub bytes_transferred: u64,
}

impl TransferResult {
    pub fn completed(bytes_transferred: u64) -> Self {
        Self {
            success: true,
            error: None,
            bytes_transferred,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            bytes_transferred: 0,
        }
    }
}

/// A file that could not be copied during a directory transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Aggregate outcome of `put_dir` / `get_dir`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    /// True only when `failed_files` is empty
    pub success: bool,
    pub files_transferred: u64,
    pub total_bytes: u64,
    /// In walk order
    pub failed_files: Vec<FailedFile>,
    /// Summary line, present when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Symbolic links that were not followed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl TransferReport {
    pub(crate) fn record_success(&mut self, bytes: u64) {
        self.files_transferred += 1;
        self.total_bytes += bytes;
    }

    pub(crate) fn record_failure(&mut self, path: impl Into<String>, error: impl ToString) {
        self.failed_files.push(FailedFile {
            path: path.into(),
            error: error.to_string(),
        });
    }

    pub(crate) fn record_skipped(&mut self, path: impl Into<String>) {
        self.skipped.push(path.into());
    }

    /// Seal the report once the walk is over.
    pub(crate) fn finish(mut self) -> Self {
        self.success = self.failed_files.is_empty();
        self.error = if self.success {
            None
        } else {
            let failed = self.failed_files.len() as u64;
            Some(format!(
                "{} of {} files failed",
                failed,
                failed + self.files_transferred
            ))
        };
        self
    }
}
