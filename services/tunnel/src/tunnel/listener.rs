//! Per-database TCP listener.
//!
//! Accepts client connections on the route's local port and, for each one,
//! resolves the current master through discovery, dials it and splices the
//! two sockets together. Failures are reported to the client as RESP errors
//! so Redis clients surface them like any other server error.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use st_resp::Frame;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use super::splice::{close_both, splice};
use crate::config::DatabaseRoute;
use crate::discovery::AddressResolver;
use crate::error::TunnelError;
use crate::shutdown;

/// Prefix of every error reply the tunnel writes itself.
pub const ERROR_PREFIX: &str = "ERR sentinel-tunnel";

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Connections fully torn down.
    pub connections_closed: AtomicU64,
    /// Connections refused because the master could not be resolved.
    pub resolve_failed: AtomicU64,
    /// Connections refused because the master could not be dialed.
    pub backend_failed: AtomicU64,
    /// Bytes proxied to the master.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from the master.
    pub bytes_from_backend: AtomicU64,
}

/// A TCP listener for one database route.
pub struct TunnelListener {
    route: DatabaseRoute,
    listener: TcpListener,
    resolver: Arc<dyn AddressResolver>,
    stats: Arc<ListenerStats>,
}

impl TunnelListener {
    /// Bind `0.0.0.0:<local_port>` for `route`.
    pub async fn bind(
        route: DatabaseRoute,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self, TunnelError> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, route.local_port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;

        info!(
            db = %route.name,
            bind_addr = %listener.local_addr().unwrap_or(bind_addr),
            "Listener bound"
        );

        Ok(Self {
            route,
            listener,
            resolver,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn route(&self) -> &DatabaseRoute {
        &self.route
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` flips to true.
    ///
    /// The listening socket is closed when this returns. Connections already
    /// being proxied keep running until one of their peers hangs up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TunnelError> {
        let port = self.listener.local_addr().map(|a| a.port()).unwrap_or(self.route.local_port);
        info!(db = %self.route.name, port, "Listener started");

        loop {
            let accepted = tokio::select! {
                _ = shutdown::cancelled(&mut shutdown) => {
                    info!(db = %self.route.name, port, "Listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(source) => {
                    error!(db = %self.route.name, port, error = %source, "Accept error");
                    return Err(TunnelError::Accept { port, source });
                }
            };

            self.stats
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);
            self.stats
                .connections_active
                .fetch_add(1, Ordering::Relaxed);

            let name = self.route.name.clone();
            let resolver = Arc::clone(&self.resolver);
            let stats = Arc::clone(&self.stats);
            let span = tracing::info_span!("connection", db = %name, peer = %peer_addr);

            tokio::spawn(
                async move {
                    handle_connection(stream, &name, resolver.as_ref(), &stats).await;

                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                }
                .instrument(span),
            );
        }
    }
}

/// Resolve, dial and splice a single client connection.
async fn handle_connection(
    client: TcpStream,
    name: &str,
    resolver: &dyn AddressResolver,
    stats: &ListenerStats,
) {
    debug!("Handling connection");

    let addr = match resolver.resolve(name).await {
        Ok(addr) => addr,
        Err(e) => {
            stats.resolve_failed.fetch_add(1, Ordering::Relaxed);
            warn!(reason = e.reason_code(), error = %e, "Failed to resolve master");
            reject(client, format!("failed to resolve database '{name}': {e}")).await;
            return;
        }
    };

    let backend = match TcpStream::connect(addr.as_str()).await {
        Ok(stream) => stream,
        Err(e) => {
            stats.backend_failed.fetch_add(1, Ordering::Relaxed);
            warn!(backend_addr = %addr, error = %e, "Failed to connect to master");
            reject(
                client,
                format!("failed to connect to database '{name}' at {addr}: {e}"),
            )
            .await;
            return;
        }
    };

    debug!(backend_addr = %addr, "Connected to master");

    let (bytes_to_backend, bytes_from_backend) = splice(client, backend).await;

    stats
        .bytes_to_backend
        .fetch_add(bytes_to_backend, Ordering::Relaxed);
    stats
        .bytes_from_backend
        .fetch_add(bytes_from_backend, Ordering::Relaxed);

    debug!(
        backend_addr = %addr,
        bytes_to_backend,
        bytes_from_backend,
        "Connection closed"
    );
}

/// Write a RESP error reply to the client and close it.
async fn reject(mut client: TcpStream, message: String) {
    let reply = Frame::SimpleError(format!("{ERROR_PREFIX}: {message}")).to_bytes();
    if let Err(e) = client.write_all(&reply).await {
        debug!(error = %e, "Failed to write error reply");
    }
    close_both(&client);
}
