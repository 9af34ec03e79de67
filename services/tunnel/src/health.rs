//! Liveness endpoint.
//!
//! A single route that answers as long as the process is up. It does not
//! check sentinel reachability.

use std::io;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::shutdown;

/// Create the health router.
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK\n")
}

/// Serve the health router until `cancel` flips to true, then drain.
pub async fn serve(listener: TcpListener, mut cancel: watch::Receiver<bool>) -> io::Result<()> {
    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            shutdown::cancelled(&mut cancel).await;
            info!("Health server shutting down");
        })
        .await
}
