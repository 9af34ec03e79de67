//! Error types for the tunnel service.

use std::io;
use std::time::Duration;

use st_resp::RespError;
use thiserror::Error;

/// Errors from the sentinel discovery connection.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No usable sentinel socket.
    #[error("not connected to sentinel")]
    NotConnected,

    /// Reading the reply failed or the socket closed.
    #[error("failed to read from sentinel: {0}")]
    ReadFailed(#[source] io::Error),

    /// Writing the request failed.
    #[error("failed to write to sentinel: {0}")]
    WriteFailed(#[source] io::Error),

    /// The reply stream contained a malformed frame.
    #[error("invalid response from sentinel: {0}")]
    InvalidResponse(String),

    /// Sentinel answered with a null array.
    #[error("null reply from sentinel")]
    NullRequest,

    /// A bulk string did not match its declared length.
    #[error("bulk string size did not match header (declared {expected} bytes)")]
    WrongBulkSize { expected: usize },

    /// A well-formed reply that is not the expected `[host, port]` pair.
    #[error("unexpected reply from sentinel: {0}")]
    UnexpectedReply(String),

    /// Sentinel does not know the database, or refused the request.
    #[error("failed to retrieve address of database '{name}' from sentinel{}", detail_suffix(.detail))]
    UnknownDatabase {
        name: String,
        detail: Option<String>,
    },

    /// Every endpoint or the whole retry budget was exhausted.
    #[error("failed to connect to any of the sentinel services")]
    DiscoveryUnreachable,

    /// The worker owning the sentinel connection is gone.
    #[error("discovery worker stopped")]
    WorkerStopped,
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(text) => format!(": {text}"),
        None => String::new(),
    }
}

impl DiscoveryError {
    /// Returns true if the sentinel socket must be replaced before retrying.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            DiscoveryError::NotConnected
                | DiscoveryError::ReadFailed(_)
                | DiscoveryError::WriteFailed(_)
                | DiscoveryError::InvalidResponse(_)
                | DiscoveryError::WrongBulkSize { .. }
        )
    }

    /// Stable short code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            DiscoveryError::NotConnected => "not_connected",
            DiscoveryError::ReadFailed(_) => "read_failed",
            DiscoveryError::WriteFailed(_) => "write_failed",
            DiscoveryError::InvalidResponse(_) => "invalid_response",
            DiscoveryError::NullRequest => "null_request",
            DiscoveryError::WrongBulkSize { .. } => "wrong_bulk_size",
            DiscoveryError::UnexpectedReply(_) => "unexpected_reply",
            DiscoveryError::UnknownDatabase { .. } => "unknown_database",
            DiscoveryError::DiscoveryUnreachable => "discovery_unreachable",
            DiscoveryError::WorkerStopped => "worker_stopped",
        }
    }
}

impl From<RespError> for DiscoveryError {
    fn from(err: RespError) -> Self {
        match err {
            RespError::ReadFailed(e) => DiscoveryError::ReadFailed(e),
            RespError::InvalidResponse(msg) => DiscoveryError::InvalidResponse(msg),
            RespError::NullRequest => DiscoveryError::NullRequest,
            RespError::WrongBulkSize { expected } => DiscoveryError::WrongBulkSize { expected },
        }
    }
}

/// Service-level errors. Any of these stops the whole tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A listener could not be bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A listener stopped accepting connections.
    #[error("cannot accept connections on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Discovery could not be established at startup.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The health server failed.
    #[error("health server failed: {0}")]
    Health(#[source] io::Error),

    /// The health server did not finish its graceful shutdown in time.
    #[error("health server did not shut down within {0:?}")]
    HealthShutdownTimeout(Duration),

    /// A supervised task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}
