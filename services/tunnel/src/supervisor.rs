//! Service supervisor.
//!
//! Owns every listener and the health server. Runs them concurrently and
//! returns the first error, cancelling everything else when one task fails
//! or when the external shutdown future resolves.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::{AddressResolver, DiscoveryConfig, DiscoveryConnection, DiscoveryHandle};
use crate::error::TunnelError;
use crate::health;
use crate::shutdown;
use crate::tunnel::TunnelListener;

/// Time the health server gets to finish its graceful shutdown.
pub const HEALTH_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A started tunnel service, ready to run.
pub struct Supervisor {
    listeners: Vec<TunnelListener>,
    health: TcpListener,
    discovery: DiscoveryHandle,
}

impl Supervisor {
    /// Connect to sentinel and bind every listener.
    ///
    /// Fails if no sentinel answers or if any port cannot be bound.
    pub async fn start(config: &Config) -> Result<Self, TunnelError> {
        let connection = DiscoveryConnection::connect(DiscoveryConfig::from(config)).await?;
        let (discovery, _worker) = DiscoveryHandle::spawn(connection);
        let resolver: Arc<dyn AddressResolver> = Arc::new(discovery.clone());

        let mut listeners = Vec::with_capacity(config.databases.len());
        for route in &config.databases {
            listeners.push(TunnelListener::bind(route.clone(), Arc::clone(&resolver)).await?);
        }

        let health = TcpListener::bind(config.http_addr.as_str())
            .await
            .map_err(|source| TunnelError::Bind {
                addr: config.http_addr.clone(),
                source,
            })?;

        info!(
            databases = listeners.len(),
            sentinels = config.sentinels.len(),
            http_addr = %health.local_addr().map_err(TunnelError::Health)?,
            "Tunnel started"
        );

        Ok(Self {
            listeners,
            health,
            discovery,
        })
    }

    /// Bound address of every route listener, in configuration order.
    pub fn listener_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| Some((l.route().name.clone(), l.local_addr().ok()?)))
            .collect()
    }

    /// Bound address of the health server.
    pub fn health_addr(&self) -> io::Result<SocketAddr> {
        self.health.local_addr()
    }

    /// Handle to the shared discovery worker.
    pub fn discovery(&self) -> DiscoveryHandle {
        self.discovery.clone()
    }

    /// Run until `shutdown` resolves or any task fails.
    ///
    /// Returns the first error. Proxied connections already in flight are
    /// left to finish on their own.
    pub async fn run<F>(self, shutdown: F) -> Result<(), TunnelError>
    where
        F: Future<Output = ()> + Send,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for listener in self.listeners {
            tasks.spawn(listener.run(cancel_rx.clone()));
        }

        let health_server = tokio::spawn(health::serve(self.health, cancel_rx.clone()));
        tasks.spawn(watch_health(health_server, cancel_rx));

        supervise(tasks, cancel_tx, shutdown).await
    }
}

/// Drive `tasks` to completion. The first failure, or `shutdown`, flips
/// `cancel_tx` so every other task winds down; the first error is returned.
async fn supervise<F>(
    mut tasks: JoinSet<Result<(), TunnelError>>,
    cancel_tx: watch::Sender<bool>,
    shutdown: F,
) -> Result<(), TunnelError>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    let mut shutdown_requested = false;
    let mut first_error: Option<TunnelError> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !shutdown_requested => {
                info!("Received shutdown signal");
                shutdown_requested = true;
                let _ = cancel_tx.send(true);
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };

                let result = joined.unwrap_or_else(|e| Err(TunnelError::Task(e.to_string())));
                if let Err(e) = result {
                    if first_error.is_none() {
                        error!(error = %e, "Task failed, shutting down");
                        first_error = Some(e);
                    } else {
                        warn!(error = %e, "Task failed during shutdown");
                    }
                    let _ = cancel_tx.send(true);
                }
            }
        }
    }

    info!("Tunnel stopped");
    first_error.map_or(Ok(()), Err)
}

/// Wait for cancellation, then give the health server a bounded time to
/// drain. An early exit of the server is reported immediately.
async fn watch_health(
    mut server: JoinHandle<io::Result<()>>,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), TunnelError> {
    tokio::select! {
        result = &mut server => return health_result(result),
        _ = shutdown::cancelled(&mut cancel) => {}
    }

    match timeout(HEALTH_SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(result) => health_result(result),
        Err(_) => {
            server.abort();
            Err(TunnelError::HealthShutdownTimeout(HEALTH_SHUTDOWN_TIMEOUT))
        }
    }
}

fn health_result(
    result: Result<io::Result<()>, tokio::task::JoinError>,
) -> Result<(), TunnelError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TunnelError::Health(e)),
        Err(e) => Err(TunnelError::Task(e.to_string())),
    }
}
