//! Single-owner worker for the discovery connection.
//!
//! The connection is owned by one task and fed through a bounded mailbox.
//! Each request carries its own reply channel, so concurrent callers are
//! answered independently and never share a response slot.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connection::DiscoveryConnection;
use crate::error::DiscoveryError;

/// Default mailbox capacity for resolution requests.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Something that can map a database name to its current `host:port`.
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    async fn resolve(&self, name: &str) -> Result<String, DiscoveryError>;
}

#[derive(Debug)]
struct ResolveRequest {
    name: String,
    reply: oneshot::Sender<Result<String, DiscoveryError>>,
}

/// Cloneable handle to the discovery worker.
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    tx: mpsc::Sender<ResolveRequest>,
}

impl DiscoveryHandle {
    /// Spawn the worker owning `connection`.
    ///
    /// The worker exits once every handle has been dropped.
    pub fn spawn(connection: DiscoveryConnection) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(connection, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn spawn_with_capacity(
        connection: DiscoveryConnection,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_worker(connection, rx));
        (Self { tx }, task)
    }

    /// Resolve `name` through the worker.
    pub async fn resolve_address(&self, name: &str) -> Result<String, DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        let request = ResolveRequest {
            name: name.to_string(),
            reply,
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| DiscoveryError::WorkerStopped)?;

        rx.await.map_err(|_| DiscoveryError::WorkerStopped)?
    }
}

#[async_trait]
impl AddressResolver for DiscoveryHandle {
    async fn resolve(&self, name: &str) -> Result<String, DiscoveryError> {
        self.resolve_address(name).await
    }
}

async fn run_worker(mut connection: DiscoveryConnection, mut rx: mpsc::Receiver<ResolveRequest>) {
    info!("Discovery worker started");

    while let Some(request) = rx.recv().await {
        if request.reply.is_closed() {
            debug!(db = %request.name, "Skipping abandoned resolve request");
            continue;
        }

        let result = connection.resolve_address(&request.name).await;
        // The caller may have given up while we were resolving.
        let _ = request.reply.send(result);
    }

    info!(
        reconnect_passes = connection.reconnect_passes(),
        "Discovery worker stopped"
    );
}
