
use std::time::Duration;

use harness::{dead_addr, read_until_closed, Answer, MockSentinel, TcpEchoBackend};
use sentinel_tunnel::{Config, DatabaseRoute, DiscoveryError, Supervisor, TunnelError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

fn test_config(sentinels: Vec<String>, databases: Vec<DatabaseRoute>) -> Config {
    Config {
        sentinels,
        password: None,
        databases,
        retry_backoff: Duration::from_millis(10),
        retry_count: 2,
        http_addr: "127.0.0.1:0".to_string(),
        log_level: "info".to_string(),
    }
}

#[tokio::test]
async fn serves_routes_and_health_then_stops() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let sentinel = MockSentinel::spawn(vec![
        ("primary", Answer::master(backend.addr)),
        ("cache", Answer::master(backend.addr)),
    ])
    .await
    .unwrap();

    let config = test_config(
        vec![sentinel.endpoint()],
        vec![DatabaseRoute::new("primary", 0), DatabaseRoute::new("cache", 0)],
    );
    let supervisor = Supervisor::start(&config).await.unwrap();

    let routes = supervisor.listener_addrs();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].0, "primary");
    assert_eq!(routes[1].0, "cache");
    let health_port = supervisor.health_addr().unwrap().port();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(supervisor.run(async move {
        let _ = stop_rx.await;
    }));

    for (_, addr) in &routes {
        let mut client = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        client.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"PING");
    }

    let mut http = TcpStream::connect(("127.0.0.1", health_port)).await.unwrap();
    http.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = String::from_utf8(read_until_closed(&mut http).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "response was {response:?}");
    assert!(response.ends_with("\r\n\r\nOK\n"), "response was {response:?}");

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(6), running)
        .await
        .expect("supervisor should stop")
        .unwrap();
    assert!(result.is_ok(), "{result:?}");

    for (_, addr) in &routes {
        assert!(TcpStream::connect(("127.0.0.1", addr.port())).await.is_err());
    }
}

#[tokio::test]
async fn start_fails_without_reachable_sentinel() {
    let config = test_config(
        vec![dead_addr().await.to_string()],
        vec![DatabaseRoute::new("primary", 0)],
    );

    let err = Supervisor::start(&config).await.err().expect("start should fail");
    assert!(matches!(
        err,
        TunnelError::Discovery(DiscoveryError::DiscoveryUnreachable)
    ));
}

#[tokio::test]
async fn start_fails_when_route_port_is_taken() {
    let sentinel = MockSentinel::spawn(vec![]).await.unwrap();
    let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let config = test_config(vec![sentinel.endpoint()], vec![DatabaseRoute::new("primary", port)]);

    let err = Supervisor::start(&config).await.err().expect("start should fail");
    match err {
        TunnelError::Bind { addr, .. } => assert_eq!(addr, format!("0.0.0.0:{port}")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn start_fails_when_health_port_is_taken() {
    let sentinel = MockSentinel::spawn(vec![]).await.unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = test_config(vec![sentinel.endpoint()], vec![DatabaseRoute::new("primary", 0)]);
    config.http_addr = taken.local_addr().unwrap().to_string();

    let err = Supervisor::start(&config).await.err().expect("start should fail");
    assert!(matches!(err, TunnelError::Bind { .. }));
}
