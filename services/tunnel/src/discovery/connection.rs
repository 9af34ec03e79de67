//! Connection to the Sentinel quorum.
//!
//! Holds at most one socket to one sentinel at a time. On transport
//! failure it walks the configured endpoints in order and retries the query
//! with a linear backoff of `attempt * retry_backoff`.

use std::io;
use std::time::Duration;

use st_resp::{Command, Frame, Reply, ReplyReader};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DiscoveryError;

/// Dial timeout per sentinel endpoint.
///
/// Kept well below the retry backoff so a dead endpoint does not stall the
/// fallback to the next one.
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(300);

/// Deadline for one request/response exchange with a sentinel.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for the discovery connection.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Sentinel endpoints (`host:port`) in fallback order.
    pub endpoints: Vec<String>,
    /// Password sent with `AUTH` ahead of every query.
    pub password: Option<String>,
    /// Maximum reconnect-and-retry rounds per resolution.
    pub retry_count: u32,
    /// Backoff multiplier between rounds.
    pub retry_backoff: Duration,
    /// Dial timeout per endpoint.
    pub dial_timeout: Duration,
    /// Deadline for writing a query and reading its whole reply.
    pub reply_timeout: Duration,
}

impl DiscoveryConfig {
    /// Create a configuration with default retry settings.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            password: None,
            retry_count: crate::config::DEFAULT_RETRY_COUNT,
            retry_backoff: crate::config::DEFAULT_RETRY_BACKOFF,
            dial_timeout: DIAL_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}

impl From<&Config> for DiscoveryConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoints: config.sentinels.clone(),
            password: config.password.clone(),
            retry_count: config.retry_count,
            retry_backoff: config.retry_backoff,
            dial_timeout: DIAL_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
        }
    }
}

enum ConnectionState {
    Disconnected,
    Connected {
        endpoint: String,
        reader: ReplyReader<BufReader<OwnedReadHalf>>,
        writer: BufWriter<OwnedWriteHalf>,
    },
}

/// A single connection to one of the configured sentinels.
pub struct DiscoveryConnection {
    config: DiscoveryConfig,
    state: ConnectionState,
    reconnect_passes: u64,
}

impl DiscoveryConnection {
    /// Create a disconnected connection. The first query will connect.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            reconnect_passes: 0,
        }
    }

    /// Create a connection and connect to the first reachable sentinel.
    pub async fn connect(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let mut connection = Self::new(config);
        if !connection.reconnect().await {
            return Err(DiscoveryError::DiscoveryUnreachable);
        }
        Ok(connection)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// Endpoint of the live socket, if any.
    pub fn current_endpoint(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Connected { endpoint, .. } => Some(endpoint),
            ConnectionState::Disconnected => None,
        }
    }

    /// Number of reconnect passes run so far, including the initial connect.
    pub fn reconnect_passes(&self) -> u64 {
        self.reconnect_passes
    }

    /// Resolve the current master address for `name` as `host:port`.
    ///
    /// Transport failures trigger a reconnect and a retry, up to
    /// `retry_count` times. Error replies from sentinel are returned as
    /// [`DiscoveryError::UnknownDatabase`] without retrying. A connection
    /// left disconnected by an earlier call is re-established first, outside
    /// the retry budget.
    pub async fn resolve_address(&mut self, name: &str) -> Result<String, DiscoveryError> {
        if !self.is_connected() && !self.reconnect().await {
            return Err(DiscoveryError::DiscoveryUnreachable);
        }

        let mut attempt: u32 = 0;

        loop {
            let err = match self.query_master_addr(name).await {
                Ok(addr) => {
                    debug!(db = %name, addr = %addr, "Resolved master address");
                    return Ok(addr);
                }
                Err(e) if e.needs_reconnect() => e,
                Err(e) => {
                    warn!(db = %name, reason = e.reason_code(), error = %e, "Sentinel rejected query");
                    return Err(e);
                }
            };

            warn!(
                db = %name,
                attempt,
                reason = err.reason_code(),
                error = %err,
                "Failed to get master from sentinel"
            );

            if attempt >= self.config.retry_count {
                return Err(DiscoveryError::DiscoveryUnreachable);
            }
            if !self.reconnect().await {
                return Err(DiscoveryError::DiscoveryUnreachable);
            }

            tokio::time::sleep(self.config.retry_backoff * attempt).await;
            attempt += 1;
        }
    }

    /// Connect to the first sentinel that accepts, in configured order.
    ///
    /// Any existing socket is closed first. Returns false once every
    /// endpoint has been tried without success.
    pub async fn reconnect(&mut self) -> bool {
        self.reconnect_passes += 1;

        for endpoint in &self.config.endpoints {
            self.state = ConnectionState::Disconnected;

            match timeout(self.config.dial_timeout, TcpStream::connect(endpoint.as_str())).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    self.state = ConnectionState::Connected {
                        endpoint: endpoint.clone(),
                        reader: ReplyReader::new(BufReader::new(read_half)),
                        writer: BufWriter::new(write_half),
                    };
                    info!(endpoint = %endpoint, "Connected to sentinel");
                    return true;
                }
                Ok(Err(e)) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to connect to sentinel");
                }
                Err(_) => {
                    warn!(
                        endpoint = %endpoint,
                        timeout_ms = self.config.dial_timeout.as_millis() as u64,
                        "Timed out connecting to sentinel"
                    );
                }
            }
        }

        false
    }

    /// One request/response round trip on the current socket.
    async fn query_master_addr(&mut self, name: &str) -> Result<String, DiscoveryError> {
        let command = self.master_addr_command(name);
        let authenticated = command.len() > 1;

        let result = self.round_trip(&command).await;

        match &result {
            Err(e) if e.needs_reconnect() => self.state = ConnectionState::Disconnected,
            // An error with no `+OK` before it answers the AUTH, and the
            // query's own reply is still in flight; drop the socket rather
            // than read it on the next call.
            Ok((Reply::SimpleError(_), 0)) if authenticated => {
                self.state = ConnectionState::Disconnected
            }
            _ => {}
        }

        match result {
            Ok((reply, _)) => interpret_reply(name, reply),
            Err(DiscoveryError::NullRequest) => Err(DiscoveryError::UnknownDatabase {
                name: name.to_string(),
                detail: None,
            }),
            Err(e) => Err(e),
        }
    }

    /// Write `command` and read one reply, within the reply deadline.
    ///
    /// Returns the reply and the number of `+OK` acknowledgments skipped
    /// before it.
    async fn round_trip(&mut self, command: &Command) -> Result<(Reply, usize), DiscoveryError> {
        let deadline = self.config.reply_timeout;
        let ConnectionState::Connected { reader, writer, .. } = &mut self.state else {
            return Err(DiscoveryError::NotConnected);
        };

        let exchange = async {
            writer
                .write_all(&command.encode())
                .await
                .map_err(DiscoveryError::WriteFailed)?;
            writer.flush().await.map_err(DiscoveryError::WriteFailed)?;

            let reply = reader.read_reply().await?;
            Ok::<_, DiscoveryError>((reply, reader.acks_skipped()))
        };

        match timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::ReadFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no complete reply within {}ms", deadline.as_millis()),
            ))),
        }
    }

    fn master_addr_command(&self, name: &str) -> Command {
        let mut command = Command::new();
        if let Some(password) = &self.config.password {
            command.push(Frame::command(["auth".to_string(), password.clone()]));
        }
        command.push(Frame::command([
            "sentinel".to_string(),
            "get-master-addr-by-name".to_string(),
            name.to_string(),
        ]));
        command
    }
}

fn interpret_reply(name: &str, reply: Reply) -> Result<String, DiscoveryError> {
    match reply {
        Reply::Array(items) if items.len() == 2 => {
            let host = std::str::from_utf8(&items[0])
                .map_err(|_| DiscoveryError::UnexpectedReply("host is not UTF-8".to_string()))?;
            let port = std::str::from_utf8(&items[1])
                .map_err(|_| DiscoveryError::UnexpectedReply("port is not UTF-8".to_string()))?;
            Ok(join_host_port(host, port))
        }
        Reply::Array(items) => Err(DiscoveryError::UnexpectedReply(format!(
            "expected [host, port], got {} items",
            items.len()
        ))),
        Reply::SimpleError(text) => Err(DiscoveryError::UnknownDatabase {
            name: name.to_string(),
            detail: Some(text),
        }),
        Reply::SimpleString(text) => Err(DiscoveryError::UnexpectedReply(format!(
            "unexpected status: {text}"
        ))),
    }
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
