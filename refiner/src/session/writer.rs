//! Result sinks that deliver encoded notifications to a client.

use std::io::{self, ErrorKind};

use thiserror::Error;

/// Failure to deliver one notification.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The remote peer is gone (broken pipe, reset, dropped receiver).
    #[error("client disconnected")]
    Disconnected,
    #[error("write failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => WriteError::Disconnected,
            _ => WriteError::Io(err),
        }
    }
}

/// Per-connection sink for newline-delimited notifications.
///
/// Implementations must serialize physical writes per connection.
pub trait ResponseWriter: Send + Sync {
    /// Write one encoded message followed by a newline.
    fn write_line(&self, line: &[u8]) -> Result<(), WriteError>;
}
