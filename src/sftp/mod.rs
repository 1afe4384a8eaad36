//! SFTP file transfer module
//!
//! Provides the file channel abstraction and the upload/download engine.

pub mod channel;
pub mod error;
pub mod path_utils;
pub mod transfer;
pub mod types;

pub use channel::{FileChannel, RemoteReader, RemoteWriter, SftpSession};
pub use error::SftpError;
pub use transfer::{ProgressSender, TransferEngine, CHUNK_SIZE};
pub use types::*;
