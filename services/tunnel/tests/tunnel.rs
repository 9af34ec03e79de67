
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{
    dead_addr, discovery_config, read_until_closed, wait_for, Answer, MockSentinel,
    StaticResolver, TcpEchoBackend, TunnelHandle,
};
use sentinel_tunnel::discovery::{DiscoveryConnection, DiscoveryHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn roundtrip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("echo should arrive")
        .unwrap();
    buf
}

#[tokio::test]
async fn proxies_bytes_to_resolved_backend() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let resolver = StaticResolver::new(&[("mymaster", backend.addr.to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver.clone()).await;

    let mut client = TcpStream::connect(tunnel.addr).await.unwrap();
    assert_eq!(roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await, b"*1\r\n$4\r\nPING\r\n");
    assert_eq!(roundtrip(&mut client, b"hello").await, b"hello");

    drop(client);
    wait_for(|| tunnel.active() == 0).await;

    assert_eq!(backend.connection_count(), 1);
    assert_eq!(resolver.calls.load(Ordering::Relaxed), 1);
    assert_eq!(tunnel.stats.connections_accepted.load(Ordering::Relaxed), 1);
    assert_eq!(tunnel.stats.bytes_to_backend.load(Ordering::Relaxed), 19);
    assert_eq!(tunnel.stats.bytes_from_backend.load(Ordering::Relaxed), 19);

    tunnel.shutdown().await.unwrap();
}

#[tokio::test]
async fn resolves_on_every_connection() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let resolver = StaticResolver::new(&[("mymaster", backend.addr.to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver.clone()).await;

    for _ in 0..3 {
        let mut client = TcpStream::connect(tunnel.addr).await.unwrap();
        assert_eq!(roundtrip(&mut client, b"x").await, b"x");
    }

    assert_eq!(resolver.calls.load(Ordering::Relaxed), 3);
    assert_eq!(backend.connection_count(), 3);
}

#[tokio::test]
async fn unknown_database_gets_error_reply_and_close() {
    let resolver = StaticResolver::new(&[]);
    let tunnel = TunnelHandle::spawn("ghost", resolver).await;

    let mut client = TcpStream::connect(tunnel.addr).await.unwrap();
    let reply = String::from_utf8(read_until_closed(&mut client).await).unwrap();

    assert_eq!(
        reply,
        "-ERR sentinel-tunnel: failed to resolve database 'ghost': \
         failed to retrieve address of database 'ghost' from sentinel\r\n"
    );
    wait_for(|| tunnel.stats.resolve_failed.load(Ordering::Relaxed) == 1).await;
    assert_eq!(tunnel.stats.backend_failed.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn dead_backend_gets_connect_error() {
    let addr = dead_addr().await;
    let resolver = StaticResolver::new(&[("mymaster", addr.to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver).await;

    let mut client = TcpStream::connect(tunnel.addr).await.unwrap();
    let reply = String::from_utf8(read_until_closed(&mut client).await).unwrap();

    let expected = format!("-ERR sentinel-tunnel: failed to connect to database 'mymaster' at {addr}: ");
    assert!(reply.starts_with(&expected), "reply was {reply:?}");
    assert!(reply.ends_with("\r\n"));
    assert_eq!(reply.matches("\r\n").count(), 1);
    wait_for(|| tunnel.stats.backend_failed.load(Ordering::Relaxed) == 1).await;
}

#[tokio::test]
async fn backend_close_tears_down_pair() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let resolver = StaticResolver::new(&[("mymaster", backend.local_addr().unwrap().to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver).await;

    let mut client = TcpStream::connect(tunnel.addr).await.unwrap();
    client.write_all(b"SET k v\r\n").await.unwrap();

    let (mut server_side, _) = backend.accept().await.unwrap();
    let mut buf = [0u8; 9];
    server_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"SET k v\r\n");

    server_side.write_all(b"+OK\r\n").await.unwrap();
    drop(server_side);

    assert_eq!(read_until_closed(&mut client).await, b"+OK\r\n");
    wait_for(|| tunnel.active() == 0).await;
    assert_eq!(tunnel.stats.connections_closed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn client_close_reaches_backend() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let resolver = StaticResolver::new(&[("mymaster", backend.local_addr().unwrap().to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver).await;

    let client = TcpStream::connect(tunnel.addr).await.unwrap();
    let (mut server_side, _) = timeout(Duration::from_secs(2), backend.accept())
        .await
        .unwrap()
        .unwrap();

    drop(client);

    assert!(read_until_closed(&mut server_side).await.is_empty());
    wait_for(|| tunnel.active() == 0).await;
}

#[tokio::test]
async fn shutdown_closes_listener_but_not_live_pairs() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let resolver = StaticResolver::new(&[("mymaster", backend.addr.to_string())]);
    let tunnel = TunnelHandle::spawn("mymaster", resolver).await;
    let addr = tunnel.addr;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(roundtrip(&mut client, b"before").await, b"before");

    tunnel.shutdown().await.unwrap();

    // The existing pair keeps working.
    assert_eq!(roundtrip(&mut client, b"after").await, b"after");
    // New connections are refused.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn end_to_end_through_sentinel() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let sentinel = MockSentinel::spawn(vec![("mymaster", Answer::master(backend.addr))])
        .await
        .unwrap();

    let conn = DiscoveryConnection::connect(discovery_config(vec![sentinel.endpoint()]))
        .await
        .unwrap();
    let (discovery, _worker) = DiscoveryHandle::spawn(conn);

    let good = TunnelHandle::spawn("mymaster", Arc::new(discovery.clone())).await;
    let bad = TunnelHandle::spawn("unknown", Arc::new(discovery)).await;

    let mut client = TcpStream::connect(good.addr).await.unwrap();
    assert_eq!(roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await, b"*1\r\n$4\r\nPING\r\n");

    let mut rejected = TcpStream::connect(bad.addr).await.unwrap();
    let reply = String::from_utf8(read_until_closed(&mut rejected).await).unwrap();
    assert!(reply.starts_with("-ERR sentinel-tunnel: failed to resolve database 'unknown'"));

    assert_eq!(sentinel.connection_count(), 1);
    assert_eq!(backend.connection_count(), 1);
}
