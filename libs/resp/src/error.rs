//! Codec error types.

use std::io;

use thiserror::Error;

/// Errors produced while decoding a reply stream.
#[derive(Debug, Error)]
pub enum RespError {
    /// The underlying stream failed or reached EOF, or produced an empty line.
    ///
    /// The connection must not be reused after this error.
    #[error("failed to read line from server: {0}")]
    ReadFailed(#[source] io::Error),

    /// The stream produced a frame this codec does not accept.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The server replied with a null array (`*-1`).
    #[error("null request")]
    NullRequest,

    /// A bulk string payload did not match its declared length.
    #[error("bulk string size did not match header (declared {expected} bytes)")]
    WrongBulkSize { expected: usize },
}

impl RespError {
    pub(crate) fn eof() -> Self {
        RespError::ReadFailed(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed",
        ))
    }

    pub(crate) fn empty_line() -> Self {
        RespError::ReadFailed(io::Error::new(io::ErrorKind::InvalidData, "empty line"))
    }

    /// Returns true if the connection that produced this error is unusable.
    ///
    /// Only transport failures qualify; a malformed but complete frame is a
    /// protocol problem, not a dead socket.
    pub fn is_connection_dead(&self) -> bool {
        matches!(self, RespError::ReadFailed(_))
    }

    /// Returns true if the byte stream can no longer be assumed frame-aligned.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            RespError::ReadFailed(_)
                | RespError::InvalidResponse(_)
                | RespError::WrongBulkSize { .. }
        )
    }
}
