//! Bidirectional byte splice between a client and its backend.

use std::io;
use std::net::Shutdown;

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 8192;

/// Copy bytes both ways until either direction ends.
///
/// Each direction runs in its own task. Whichever finishes first, by EOF or
/// by error, shuts down both sockets in both directions so the other task
/// unblocks and the pair is torn down.
///
/// Returns `(bytes_to_backend, bytes_from_backend)`.
pub async fn splice(client: TcpStream, backend: TcpStream) -> (u64, u64) {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let upstream = tokio::spawn(pipe(client_read, backend_write, "client->backend"));
    let downstream = tokio::spawn(pipe(backend_read, client_write, "backend->client"));

    let (to_backend, from_backend) = tokio::join!(upstream, downstream);
    (to_backend.unwrap_or(0), from_backend.unwrap_or(0))
}

async fn pipe(mut from: OwnedReadHalf, mut to: OwnedWriteHalf, direction: &'static str) -> u64 {
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let result: io::Result<()> = async {
        loop {
            let n = from.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            to.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }
    .await;

    if let Err(e) = result {
        debug!(direction, error = %e, "Copy ended with error");
    }

    close_both(from.as_ref());
    close_both(to.as_ref());
    total
}

/// Shut down both directions of a socket. A peer that already went away
/// reports `NotConnected`, which is fine.
pub(crate) fn close_both(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).shutdown(Shutdown::Both) {
        if e.kind() != io::ErrorKind::NotConnected {
            debug!(error = %e, "Socket shutdown failed");
        }
    }
}
