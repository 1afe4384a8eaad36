//! Loopback provider
//!
//! Runs commands and serves files on the local machine through the same
//! [`Connector`](crate::ssh::Connector) seam the russh provider uses. Useful
//! for dry runs and for exercising the session layer without a server.

mod files;
mod transport;

pub use files::LocalFileChannel;
pub use transport::{LocalConnector, LocalTransport};
